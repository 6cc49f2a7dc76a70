//! Self-updating agent for network-connected ESP devices.
//!
//! Each [`OtaAgent::handle`] call checks a GitHub-style release feed for a
//! version newer than the one running and, if found, flashes the firmware
//! partition and the filesystem partition in two stages separated by a
//! reboot. A durable pending marker makes the two-stage sequence crash-safe:
//! after any restart the agent infers the correct next stage from the marker
//! alone.
//!
//! The network transport, flash appliers, time sync and restart are
//! capability traits. The `esp` feature provides ESP-IDF implementations and
//! a wired-up [`esp::GithubOta`] facade; without it the crate builds and
//! tests on the host.

pub mod agent;
pub mod applier;
pub mod error;
pub mod events;
pub mod http;
pub mod marker;
pub mod platform;
pub mod release;
pub mod version;

#[cfg(feature = "esp")]
pub mod esp;

pub use agent::{OtaAgent, OtaConfig, UpdateState};
pub use applier::{Applier, PartitionTarget};
pub use error::UpdateError;
pub use events::{LogEvents, UpdateEvents};
pub use http::{HttpClient, HttpResponse, RedirectPolicy};
pub use marker::PendingMarker;
pub use platform::{Reboot, TimeSync};
pub use release::{ReleaseDescriptor, ResolutionStrategy};
pub use version::Version;
