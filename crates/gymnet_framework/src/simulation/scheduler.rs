use super::kernel::{ControlInterval, KernelError, SimTime, SimulationKernel, TimerHandle};

use thiserror::Error;

/// `Idle -> Armed -> Fired -> Armed -> ... -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed { at: SimTime },
    Fired { at: SimTime },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SchedulerState,
    },
    #[error("Timer {0:?} does not belong to this scheduler")]
    ForeignTimer(TimerHandle),
}

/// One fire of the scheduler. `index` starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub index: u64,
    pub at: SimTime,
}

/// Fires once per control interval in simulated time.
///
/// The next fire is always `fire_time + interval`, however long the work done in between
/// takes in wall-clock time.
#[derive(Debug)]
pub struct TickScheduler {
    interval: ControlInterval,
    timer: Option<TimerHandle>,
    state: SchedulerState,
    fired: u64,
}

impl TickScheduler {
    pub fn new(interval: ControlInterval) -> Self {
        Self {
            interval,
            timer: None,
            state: SchedulerState::Idle,
            fired: 0,
        }
    }

    pub fn interval(&self) -> ControlInterval {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn ticks_fired(&self) -> u64 {
        self.fired
    }

    pub fn owns(&self, handle: TimerHandle) -> bool {
        self.timer == Some(handle)
    }

    /// Arms the first fire at `now + interval`.
    pub fn start<K: SimulationKernel + ?Sized>(
        &mut self,
        kernel: &mut K,
    ) -> Result<SimTime, SchedulerError> {
        if self.state != SchedulerState::Idle {
            return Err(SchedulerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        let handle = kernel.allocate_timer();
        self.timer = Some(handle);
        let now = kernel.now();
        self.arm(kernel, now)
    }

    pub fn on_fire(&mut self, handle: TimerHandle) -> Result<Tick, SchedulerError> {
        if !self.owns(handle) {
            return Err(SchedulerError::ForeignTimer(handle));
        }
        let SchedulerState::Armed { at } = self.state else {
            return Err(SchedulerError::InvalidState {
                operation: "fire",
                state: self.state,
            });
        };
        self.fired += 1;
        self.state = SchedulerState::Fired { at };
        Ok(Tick {
            index: self.fired,
            at,
        })
    }

    /// Schedules the next fire relative to the last fire time.
    pub fn rearm<K: SimulationKernel + ?Sized>(
        &mut self,
        kernel: &mut K,
    ) -> Result<SimTime, SchedulerError> {
        let SchedulerState::Fired { at } = self.state else {
            return Err(SchedulerError::InvalidState {
                operation: "rearm",
                state: self.state,
            });
        };
        self.arm(kernel, at)
    }

    /// Cancels any pending fire. Further calls to `start` or `rearm` fail.
    pub fn shutdown<K: SimulationKernel + ?Sized>(&mut self, kernel: &mut K) {
        if let (SchedulerState::Armed { .. }, Some(handle)) = (self.state, self.timer) {
            kernel.cancel(handle);
        }
        self.state = SchedulerState::Stopped;
    }

    fn arm<K: SimulationKernel + ?Sized>(
        &mut self,
        kernel: &mut K,
        from: SimTime,
    ) -> Result<SimTime, SchedulerError> {
        let handle = self.timer.ok_or(SchedulerError::InvalidState {
            operation: "arm",
            state: self.state,
        })?;
        let at = from
            .checked_add(self.interval)
            .ok_or(KernelError::TimeOverflow)?;
        kernel.schedule_at(at, handle)?;
        self.state = SchedulerState::Armed { at };
        Ok(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::kernel::EventQueueKernel;
    use std::thread;
    use std::time::Duration;

    fn interval_100() -> ControlInterval {
        ControlInterval::from_nanos(100).unwrap()
    }

    #[test]
    fn test_ticks_at_100_and_200_despite_slow_work() {
        let mut kernel = EventQueueKernel::new();
        let mut scheduler = TickScheduler::new(interval_100());
        assert_eq!(scheduler.start(&mut kernel).unwrap(), SimTime::from_nanos(100));

        let mut ticks = Vec::new();
        while ticks.len() < 2 {
            let (_, handle) = kernel.pop_next().unwrap();
            let tick = scheduler.on_fire(handle).unwrap();
            // Blocking work costs wall-clock time only.
            thread::sleep(Duration::from_millis(30));
            ticks.push(tick);
            scheduler.rearm(&mut kernel).unwrap();
        }

        assert_eq!(
            ticks,
            vec![
                Tick { index: 1, at: SimTime::from_nanos(100) },
                Tick { index: 2, at: SimTime::from_nanos(200) },
            ]
        );
        assert_eq!(
            scheduler.state(),
            SchedulerState::Armed { at: SimTime::from_nanos(300) }
        );
    }

    #[test]
    fn test_start_is_relative_to_now() {
        let mut kernel = EventQueueKernel::new();
        kernel.run_until(SimTime::from_nanos(40), |_, _| {});
        let mut scheduler = TickScheduler::new(interval_100());
        assert_eq!(scheduler.start(&mut kernel).unwrap(), SimTime::from_nanos(140));
    }

    #[test]
    fn test_shutdown_cancels_pending_fire() {
        let mut kernel = EventQueueKernel::new();
        let mut scheduler = TickScheduler::new(interval_100());
        scheduler.start(&mut kernel).unwrap();
        scheduler.shutdown(&mut kernel);

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(kernel.pop_next(), None);
        assert!(matches!(
            scheduler.start(&mut kernel),
            Err(SchedulerError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_foreign_timer_and_double_fire_rejected() {
        let mut kernel = EventQueueKernel::new();
        let stranger = kernel.allocate_timer();
        let mut scheduler = TickScheduler::new(interval_100());
        scheduler.start(&mut kernel).unwrap();

        assert_eq!(
            scheduler.on_fire(stranger),
            Err(SchedulerError::ForeignTimer(stranger))
        );

        let (_, handle) = kernel.pop_next().unwrap();
        scheduler.on_fire(handle).unwrap();
        assert!(matches!(
            scheduler.on_fire(handle),
            Err(SchedulerError::InvalidState { .. })
        ));
    }
}
