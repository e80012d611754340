//! Timer seam between the engine and the surrounding event loop
//!
//! The engine never owns a clock. Every entry point that may arm a timer
//! receives the scheduler explicitly; fired timers come back as
//! [`TimerEvent`] values through `HwmpProtocol::on_timer`.

use std::time::Duration;

use hwmp_protocol::MeshAddress;

/// Opaque handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(id: u64) -> Self {
        TimerHandle(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Work to perform when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// Transmit pending PREQs of an interface
    FlushPreq { interface: u32 },
    /// Transmit pending PERRs of an interface
    FlushPerr { interface: u32 },
    /// Active path lifetime elapsed
    PathExpired { destination: MeshAddress },
}

/// Delayed event delivery with cancellation
pub trait Scheduler {
    /// Current time since the start of the run
    fn now(&self) -> Duration;

    /// Deliver `event` back to the engine after `delay`
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Cancel a pending timer; unknown or fired handles are ignored
    fn cancel(&mut self, handle: TimerHandle);

    fn is_pending(&self, handle: TimerHandle) -> bool;
}

/// At most one in-flight timer
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<TimerHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Arm the slot unless a timer is already in flight
    pub fn arm(&mut self, scheduler: &mut dyn Scheduler, delay: Duration, event: TimerEvent) -> bool {
        if self.handle.is_some() {
            return false;
        }
        self.handle = Some(scheduler.schedule(delay, event));
        true
    }

    /// Forget the in-flight timer; called when it fires
    pub fn clear(&mut self) -> Option<TimerHandle> {
        self.handle.take()
    }

    pub fn cancel(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(handle) = self.handle.take() {
            scheduler.cancel(handle);
        }
    }
}
