// Platform capabilities the agent requests but never implements itself:
// wall-clock sync (required before TLS certificate validation on devices
// without an RTC) and the device restart between the two update stages.

use std::time::Duration;

use crate::error::UpdateError;

pub trait TimeSync {
    /// Blocks until the system clock is valid or the timeout elapses.
    /// A timeout is an error; the agent must never wait unbounded.
    fn ensure_synced(&mut self, timeout: Duration) -> Result<(), UpdateError>;
}

pub trait Reboot {
    /// Requests a device restart. On real hardware this does not return;
    /// test doubles record the request instead.
    fn restart(&mut self);
}

/// For deployments whose clock is already valid (externally synced or RTC
/// backed); performs no wait at all.
pub struct ClockAlreadyValid;

impl TimeSync for ClockAlreadyValid {
    fn ensure_synced(&mut self, _timeout: Duration) -> Result<(), UpdateError> {
        Ok(())
    }
}
