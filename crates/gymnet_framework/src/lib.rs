//! # Gymnet Framework Structure
//! Gymnet bridges a time-stepped simulated entity and an external decision-making agent
//! through a synchronous request/reply exchange performed once per control interval.
//!
//! Every tick the entity packages its state as an observation and a reward, sends them to the
//! agent, blocks until the agent's action arrives, and applies it. Simulated time never
//! advances while the exchange blocks, so a slow agent bunches ticks up in wall-clock time
//! without drifting the simulation clock.
//!
//! The framework is organised into the following submodules:
//!
//! - **Network Modules** (`network::*`): byte-stream transports (TCP, Unix IPC, ZeroMQ),
//!   length-prefixed framing, the blocking [`ConnectionChannel`](network::channel::ConnectionChannel),
//!   and the agent-side endpoint used to answer requests.
//! - **Simulation Modules** (`simulation::*`): the seam to the discrete-event kernel and the
//!   [`TickScheduler`](simulation::scheduler::TickScheduler) that fires once per interval.
//! - **Entity Modules** (`entity::*`): request assembly, reply interpretation and the per-tick
//!   state machine of a [`GymEntity`](entity::gym_entity::GymEntity).
//! - **Utilities** (`utilities::*`): JSON configuration, log4rs logging and prometheus metrics.
//!
//! ## Using Gymnet
//!
//! ```rust,ignore
//! use gymnet_framework::prelude::*;
//! use std::sync::Arc;
//!
//! let config = GymConfigLoader::new_config(None)?;
//! let transport = transport_factory(&config.transport_config)?;
//! let channel = Arc::new(ConnectionChannel::new(transport, ChannelParams::from(&config.transport_config)));
//! channel.connect()?;
//!
//! let mut kernel = EventQueueKernel::new();
//! let mut entity = GymEntity::new(channel, my_source, my_sink, &config.entity_config)?;
//! entity.initialize(&mut kernel)?;
//! kernel.run_until(SimTime::from_millis(500), |kernel, handle| {
//!     if let Err(e) = entity.handle_timer(kernel, handle) {
//!         log::error!("tick failed: {}", e);
//!     }
//! });
//! ```

/// **Network Modules**: transports, framing, the connection channel and the agent endpoint.
pub mod network;

/// **Simulation Modules**: simulated time, the kernel seam and the tick scheduler.
pub mod simulation {
    pub mod kernel;
    pub mod scheduler;

    pub use kernel::{
        ControlInterval, EventQueueKernel, KernelError, SimTime, SimulationKernel, TimerHandle,
    };
}

/// **Entity Modules**: per-tick request assembly, reply interpretation and the entity state machine.
pub mod entity {
    pub mod builder;
    pub mod gym_entity;
    pub mod interpreter;
}

/// **System Utilities**: configuration resolution and observability.
pub mod utilities {
    pub mod configuration;
    pub mod observability;
}

pub mod prelude {
    pub mod config {
        pub use crate::utilities::configuration::{
            ConfigError, ConnectionErrorPolicy, EntityConfigBuildParams, EntityConfigBuilder,
            EntityConfigParams, GymConfigLoader, LoggingParams, NetworkParams,
            ProtocolErrorPolicy, TransportConfigBuildParams, TransportConfigBuilder,
            TransportConfigParams,
        };
    }

    pub use crate::entity::builder::{IdPolicy, MessageBuilder, Observation};
    pub use crate::entity::gym_entity::{
        ActionOrigin, ActionSink, CycleOutcome, EntityError, EntityState, EntityStats, GymEntity,
        ObservationSource, TickReport,
    };
    pub use crate::entity::interpreter::{ActionOutcome, InterpretedActions, ReplyInterpreter};
    pub use crate::network::channel::{ChannelError, ChannelParams, ConnectionChannel, ProtocolError};
    pub use crate::network::peer::{AgentListener, AgentSession, Policy};
    pub use crate::network::transport::{transport_factory, Transport, TransportError};
    pub use crate::network::TransportType;
    pub use crate::simulation::scheduler::{SchedulerState, Tick, TickScheduler};
    pub use crate::simulation::{
        ControlInterval, EventQueueKernel, SimTime, SimulationKernel, TimerHandle,
    };
    pub use crate::utilities::configuration::GymConfigLoader;

    pub use gymnet_types::prelude::*;
}
