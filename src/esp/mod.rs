// ESP-IDF implementations of the agent's capability traits, plus a facade
// that wires them together for the common case.

pub mod applier;
pub mod platform;
pub mod transport;

pub use applier::EspApplier;
pub use platform::{EspReboot, SntpTimeSync};
pub use transport::EspTransport;

use crate::agent::{OtaAgent, OtaConfig, UpdateState};
use crate::events::LogEvents;

/// Ready-wired update agent for ESP devices tracking a GitHub release feed.
/// Owns the transport, applier, SNTP sync and reboot hooks; call `handle()`
/// from the firmware's periodic maintenance task.
pub struct GithubOta {
    config: OtaConfig,
    transport: EspTransport,
    applier: EspApplier,
    time_sync: SntpTimeSync,
    reboot: EspReboot,
    events: LogEvents,
}

impl GithubOta {
    pub fn new(config: OtaConfig) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            transport: EspTransport::new()?,
            applier: EspApplier::new()?,
            time_sync: SntpTimeSync::new(),
            reboot: EspReboot,
            events: LogEvents::new(),
        })
    }

    /// Runs one check-and-update cycle. On a successful firmware stage this
    /// does not return: the device restarts and the next boot resumes with
    /// the filesystem stage.
    pub fn handle(&mut self) -> UpdateState {
        let mut agent = OtaAgent::new(
            self.config.clone(),
            &mut self.transport,
            &mut self.applier,
            &mut self.time_sync,
            &mut self.reboot,
            &mut self.events,
        );
        agent.handle()
    }
}
