//! Per-tick state machine of a simulated entity talking to a peer agent.
//!
//! ```text
//!            tick                  reply
//!   Idle ──────────▶ AwaitingReply ──────▶ Idle
//!     ▲                  │  timeout / degrade-on-connection-error
//!     │ reconnected      ▼
//!     └──────────── Degraded            (terminate policies) ──▶ Terminated
//! ```
//!
//! Every tick applies exactly one action set to the sink: the agent's reply, the configured
//! fallback, or an explicit no-action. Nothing is applied once terminated.

use crate::entity::builder::{MessageBuilder, Observation};
use crate::entity::interpreter::{ActionOutcome, InterpretedActions, ReplyInterpreter};
use crate::network::channel::{ChannelError, ConnectionChannel};
use crate::network::transport::Transport;
use crate::simulation::scheduler::{SchedulerError, Tick, TickScheduler};
use crate::simulation::{SimTime, SimulationKernel, TimerHandle};
use crate::utilities::configuration::{
    ConfigError, ConnectionErrorPolicy, EntityConfigParams, ProtocolErrorPolicy,
};

use gymnet_types::prelude::ValueError;

use std::sync::Arc;
use thiserror::Error;

/// Supplies the live feature values sent each tick.
pub trait ObservationSource {
    fn sample(&mut self, now: SimTime) -> Observation;
}

impl<F> ObservationSource for F
where
    F: FnMut(SimTime) -> Observation,
{
    fn sample(&mut self, now: SimTime) -> Observation {
        self(now)
    }
}

/// Receives the decoded actions of each tick.
pub trait ActionSink {
    fn apply(&mut self, now: SimTime, actions: &InterpretedActions, origin: ActionOrigin);
}

impl<F> ActionSink for F
where
    F: FnMut(SimTime, &InterpretedActions, ActionOrigin),
{
    fn apply(&mut self, now: SimTime, actions: &InterpretedActions, origin: ActionOrigin) {
        self(now, actions, origin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOrigin {
    /// Decoded from the agent's reply.
    Agent,
    /// Configured default, used when no reply can be had.
    Fallback,
    /// Every key missing; the reply for this tick was unusable.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Idle,
    AwaitingReply { request_id: i64 },
    Degraded,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied,
    Fallback,
    NoOp,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    pub request_id: Option<i64>,
    pub outcome: CycleOutcome,
    pub state: EntityState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub ticks: u64,
    pub exchanges: u64,
    pub fallbacks: u64,
    pub no_ops: u64,
    pub reconnects: u64,
}

#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("[EntityError] Observation could not be encoded: {0}")]
    Observation(#[from] ValueError),
    #[error("[EntityError] Entity has terminated")]
    Terminated,
}

pub struct GymEntity<T: Transport, S: ObservationSource, A: ActionSink> {
    channel: Arc<ConnectionChannel<T>>,
    source: S,
    sink: A,
    scheduler: TickScheduler,
    builder: MessageBuilder,
    interpreter: ReplyInterpreter,
    fallback: InterpretedActions,
    on_protocol_error: ProtocolErrorPolicy,
    on_connection_error: ConnectionErrorPolicy,
    reconnect_when_degraded: bool,
    state: EntityState,
    stats: EntityStats,
    last_error: Option<String>,
}

impl<T, S, A> GymEntity<T, S, A>
where
    T: Transport,
    S: ObservationSource,
    A: ActionSink,
{
    pub fn new(
        channel: Arc<ConnectionChannel<T>>,
        source: S,
        sink: A,
        config: &EntityConfigParams,
    ) -> Result<Self, EntityError> {
        config.validate()?;
        let interpreter = ReplyInterpreter::new(config.action_keys.iter().cloned());
        let fallback = InterpretedActions::from_outcomes(
            config
                .action_keys
                .iter()
                .map(|key| {
                    let outcome = match config.fallback_actions.get(key) {
                        Some(values) => ActionOutcome::Values(values.clone()),
                        None => ActionOutcome::Missing,
                    };
                    (key.clone(), outcome)
                })
                .collect(),
        );

        Ok(Self {
            channel,
            source,
            sink,
            scheduler: TickScheduler::new(config.control_interval()?),
            builder: MessageBuilder::new(config.id_policy),
            interpreter,
            fallback,
            on_protocol_error: config.on_protocol_error,
            on_connection_error: config.on_connection_error,
            reconnect_when_degraded: config.reconnect_when_degraded,
            state: EntityState::Idle,
            stats: EntityStats::default(),
            last_error: None,
        })
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn stats(&self) -> EntityStats {
        self.stats
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn channel(&self) -> &Arc<ConnectionChannel<T>> {
        &self.channel
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Description of the failure that degraded or terminated the entity.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_terminated(&self) -> bool {
        self.state == EntityState::Terminated
    }

    pub fn owns_timer(&self, handle: TimerHandle) -> bool {
        self.scheduler.owns(handle)
    }

    /// Arms the first tick one interval from now.
    pub fn initialize<K: SimulationKernel + ?Sized>(
        &mut self,
        kernel: &mut K,
    ) -> Result<SimTime, EntityError> {
        if self.is_terminated() {
            return Err(EntityError::Terminated);
        }
        let first = self.scheduler.start(kernel)?;
        log::info!(
            "[GymEntity] First tick at {} (channel {})",
            first,
            self.channel.channel_id()
        );
        Ok(first)
    }

    /// Runs one interaction cycle for a fired timer and rearms for the next interval.
    pub fn handle_timer<K: SimulationKernel + ?Sized>(
        &mut self,
        kernel: &mut K,
        handle: TimerHandle,
    ) -> Result<TickReport, EntityError> {
        if self.is_terminated() {
            return Err(EntityError::Terminated);
        }
        let tick = self.scheduler.on_fire(handle)?;
        self.stats.ticks += 1;

        let (request_id, outcome) = match self.run_cycle(tick.at) {
            Ok(result) => result,
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.terminate(kernel);
                return Err(e);
            }
        };

        if self.is_terminated() {
            self.scheduler.shutdown(kernel);
        } else {
            self.scheduler.rearm(kernel)?;
        }

        Ok(TickReport {
            tick,
            request_id,
            outcome,
            state: self.state,
        })
    }

    /// Stops participation: cancels the pending tick. The channel is left to its owner.
    pub fn terminate<K: SimulationKernel + ?Sized>(&mut self, kernel: &mut K) {
        if self.state != EntityState::Terminated {
            log::info!("[GymEntity] Terminating after {} ticks", self.stats.ticks);
        }
        self.state = EntityState::Terminated;
        self.scheduler.shutdown(kernel);
    }

    fn run_cycle(&mut self, now: SimTime) -> Result<(Option<i64>, CycleOutcome), EntityError> {
        if self.state == EntityState::Degraded && !self.try_recover() {
            self.apply_fallback(now);
            return Ok((None, CycleOutcome::Fallback));
        }

        let sample = self.source.sample(now);
        let request = self.builder.build_from_observation(&sample)?;
        let request_id = request.id;
        self.state = EntityState::AwaitingReply { request_id };

        let outcome = match self.channel.communicate(&request) {
            Ok(reply) => {
                let actions = self.interpreter.interpret(&reply);
                self.sink.apply(now, &actions, ActionOrigin::Agent);
                self.stats.exchanges += 1;
                self.state = EntityState::Idle;
                CycleOutcome::Applied
            }
            Err(err) => self.handle_failure(now, err),
        };
        Ok((Some(request_id), outcome))
    }

    fn handle_failure(&mut self, now: SimTime, err: ChannelError) -> CycleOutcome {
        log::warn!("[GymEntity] Exchange failed at {}: {}", now, err);
        self.last_error = Some(err.to_string());

        match err {
            ChannelError::TimeoutError(_) => {
                self.state = EntityState::Degraded;
                self.apply_fallback(now);
                CycleOutcome::Fallback
            }
            ChannelError::ProtocolError(_) => match self.on_protocol_error {
                ProtocolErrorPolicy::NoOp => {
                    self.apply_no_op(now);
                    self.state = if self.channel.is_connected() {
                        EntityState::Idle
                    } else {
                        EntityState::Degraded
                    };
                    CycleOutcome::NoOp
                }
                ProtocolErrorPolicy::Terminate => {
                    self.state = EntityState::Terminated;
                    CycleOutcome::Terminated
                }
            },
            ChannelError::ConnectionError(_) => match self.on_connection_error {
                ConnectionErrorPolicy::Degrade => {
                    self.state = EntityState::Degraded;
                    self.apply_fallback(now);
                    CycleOutcome::Fallback
                }
                ConnectionErrorPolicy::Terminate => {
                    self.state = EntityState::Terminated;
                    CycleOutcome::Terminated
                }
            },
            ChannelError::ChannelBusy { .. } => {
                self.apply_no_op(now);
                self.state = EntityState::Idle;
                CycleOutcome::NoOp
            }
        }
    }

    /// Reconnects a degraded entity when allowed. Returns whether normal exchanges resume.
    fn try_recover(&mut self) -> bool {
        if !self.reconnect_when_degraded {
            return false;
        }
        match self.channel.reconnect() {
            Ok(()) => {
                log::info!("[GymEntity] Reconnected to {}", self.channel.peer_address());
                self.stats.reconnects += 1;
                self.state = EntityState::Idle;
                true
            }
            Err(e) => {
                log::debug!("[GymEntity] Reconnect failed: {}", e);
                false
            }
        }
    }

    fn apply_fallback(&mut self, now: SimTime) {
        self.stats.fallbacks += 1;
        self.sink.apply(now, &self.fallback, ActionOrigin::Fallback);
    }

    fn apply_no_op(&mut self, now: SimTime) {
        self.stats.no_ops += 1;
        let actions = self.interpreter.no_action();
        self.sink.apply(now, &actions, ActionOrigin::NoOp);
    }
}
