//! Seam to the discrete-event simulation kernel.
//!
//! Entities only ever see [`SimulationKernel`]: the current simulated time and one-shot
//! timers. [`EventQueueKernel`] is a small deterministic implementation used by the example
//! binary and the tests.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Simulated time, nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, interval: ControlInterval) -> Option<SimTime> {
        self.0.checked_add(interval.as_nanos()).map(SimTime)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0 as f64 / 1e9)
    }
}

/// Fixed simulated-time period between ticks. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlInterval(u64);

impl ControlInterval {
    pub fn from_nanos(nanos: u64) -> Result<Self, KernelError> {
        if nanos == 0 {
            return Err(KernelError::ZeroInterval);
        }
        Ok(Self(nanos))
    }

    pub fn from_duration(duration: Duration) -> Result<Self, KernelError> {
        let nanos = u64::try_from(duration.as_nanos()).map_err(|_| KernelError::TimeOverflow)?;
        Self::from_nanos(nanos)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("Cannot schedule at {at}, simulated time is already {now}")]
    InThePast { at: SimTime, now: SimTime },
    #[error("Timer {0:?} is already scheduled")]
    AlreadyScheduled(TimerHandle),
    #[error("Control interval must be non-zero")]
    ZeroInterval,
    #[error("Simulated time overflow")]
    TimeOverflow,
}

pub trait SimulationKernel {
    fn now(&self) -> SimTime;
    fn allocate_timer(&mut self) -> TimerHandle;
    /// One-shot wake-up; delivered exactly once unless cancelled first.
    fn schedule_at(&mut self, at: SimTime, handle: TimerHandle) -> Result<(), KernelError>;
    /// Returns whether a pending wake-up was removed.
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}

/// Binary-heap event queue. Events at equal times fire in scheduling order.
#[derive(Debug, Default)]
pub struct EventQueueKernel {
    now: SimTime,
    next_handle: u64,
    next_seq: u64,
    queue: BinaryHeap<Reverse<(SimTime, u64, TimerHandle)>>,
    // handle -> seq of its live entry; heap entries with another seq are stale
    scheduled: HashMap<TimerHandle, u64>,
}

impl EventQueueKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.scheduled.contains_key(&handle)
    }

    /// Advances simulated time to the next live event and returns it.
    pub fn pop_next(&mut self) -> Option<(SimTime, TimerHandle)> {
        while let Some(Reverse((at, seq, handle))) = self.queue.pop() {
            if self.scheduled.get(&handle) == Some(&seq) {
                self.scheduled.remove(&handle);
                self.now = at;
                return Some((at, handle));
            }
        }
        None
    }

    fn peek_time(&mut self) -> Option<SimTime> {
        while let Some(Reverse((at, seq, handle))) = self.queue.peek().copied() {
            if self.scheduled.get(&handle) == Some(&seq) {
                return Some(at);
            }
            self.queue.pop();
        }
        None
    }

    /// Dispatches every event due at or before `limit`, then leaves the clock at `limit`.
    /// Returns the number of events dispatched.
    pub fn run_until<F>(&mut self, limit: SimTime, mut dispatch: F) -> usize
    where
        F: FnMut(&mut Self, TimerHandle),
    {
        let mut dispatched = 0;
        while self.peek_time().is_some_and(|at| at <= limit) {
            let Some((_, handle)) = self.pop_next() else {
                break;
            };
            dispatch(self, handle);
            dispatched += 1;
        }
        if self.now < limit {
            self.now = limit;
        }
        dispatched
    }
}

impl SimulationKernel for EventQueueKernel {
    fn now(&self) -> SimTime {
        self.now
    }

    fn allocate_timer(&mut self) -> TimerHandle {
        self.next_handle += 1;
        TimerHandle(self.next_handle)
    }

    fn schedule_at(&mut self, at: SimTime, handle: TimerHandle) -> Result<(), KernelError> {
        if at < self.now {
            return Err(KernelError::InThePast { at, now: self.now });
        }
        if self.scheduled.contains_key(&handle) {
            return Err(KernelError::AlreadyScheduled(handle));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.scheduled.insert(handle, seq);
        self.queue.push(Reverse((at, seq, handle)));
        Ok(())
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.scheduled.remove(&handle).is_some()
    }
}
