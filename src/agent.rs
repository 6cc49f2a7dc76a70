// Update orchestration state machine.
//
// One `handle()` call runs a full check-and-update cycle to a terminal state.
// The two flash stages are independent, non-atomic operations, so the cycle
// persists a durable marker between them: after any restart the next stage is
// inferred from marker state alone, never from volatile memory.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::applier::{Applier, PartitionTarget};
use crate::error::UpdateError;
use crate::events::{ProgressReader, UpdateEvents};
use crate::http::{HttpClient, RedirectPolicy};
use crate::marker::{PendingMarker, DEFAULT_MARKER_PATH};
use crate::platform::{Reboot, TimeSync};
use crate::release::{resolve, ReleaseDescriptor, ResolutionStrategy};
use crate::version::Version;

pub const DEFAULT_FIRMWARE_NAME: &str = "firmware.bin";
pub const DEFAULT_FILESYSTEM_NAME: &str = "filesystem.bin";
const DEFAULT_TIME_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable for the agent's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    pub current_version: Version,
    pub release_url: String,
    pub firmware_name: String,
    pub filesystem_name: String,
    pub marker_path: PathBuf,
    pub strategy: ResolutionStrategy,
    pub time_sync_timeout: Duration,
}

impl OtaConfig {
    pub fn new(
        current_version: Version,
        release_url: impl Into<String>,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            current_version,
            release_url: release_url.into(),
            firmware_name: DEFAULT_FIRMWARE_NAME.to_string(),
            filesystem_name: DEFAULT_FILESYSTEM_NAME.to_string(),
            marker_path: PathBuf::from(DEFAULT_MARKER_PATH),
            strategy,
            time_sync_timeout: DEFAULT_TIME_SYNC_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    FirmwareUpdating,
    FsUpdating,
    Done,
    Failed,
}

pub struct OtaAgent<'a> {
    config: OtaConfig,
    http: &'a mut dyn HttpClient,
    applier: &'a mut dyn Applier,
    time_sync: &'a mut dyn TimeSync,
    reboot: &'a mut dyn Reboot,
    events: &'a mut dyn UpdateEvents,
    marker: PendingMarker,
    state: UpdateState,
}

impl<'a> OtaAgent<'a> {
    pub fn new(
        config: OtaConfig,
        http: &'a mut dyn HttpClient,
        applier: &'a mut dyn Applier,
        time_sync: &'a mut dyn TimeSync,
        reboot: &'a mut dyn Reboot,
        events: &'a mut dyn UpdateEvents,
    ) -> Self {
        let marker = PendingMarker::at(&config.marker_path);
        Self {
            config,
            http,
            applier,
            time_sync,
            reboot,
            events,
            marker,
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Runs one full cycle to a terminal state and returns it. `Done` and
    /// `Failed` are non-sticky; the next call starts over at `Checking`.
    /// Must not be re-entered while a cycle is in flight.
    pub fn handle(&mut self) -> UpdateState {
        self.state = UpdateState::Checking;
        self.state = match self.run_cycle() {
            Ok(state) => state,
            Err(err) => {
                log::warn!("Update cycle failed while {:?}: {err}", self.state);
                self.events.update_error(&err);
                UpdateState::Failed
            }
        };
        self.state
    }

    fn run_cycle(&mut self) -> Result<UpdateState, UpdateError> {
        // Certificate-date validation needs a valid wall clock first.
        self.time_sync
            .ensure_synced(self.config.time_sync_timeout)?;

        // A set marker means a prior cycle flashed firmware and rebooted;
        // only the filesystem stage is owed. The asset base URL is never
        // persisted, so the release is re-resolved this cycle and the
        // version comparison is skipped.
        if self.marker.exists() {
            log::info!("Pending marker set; resuming filesystem stage after reboot");
            let release = resolve(self.http, self.config.strategy, &self.config.release_url)?;
            return self.filesystem_stage(&release);
        }

        let release = resolve(self.http, self.config.strategy, &self.config.release_url)?;
        if release.version <= self.config.current_version {
            log::info!(
                "No update: feed has {}, running {}",
                release.version,
                self.config.current_version
            );
            return Ok(UpdateState::Done);
        }

        log::info!(
            "Update available: {} -> {}",
            self.config.current_version,
            release.version
        );
        self.firmware_stage(&release)
    }

    fn firmware_stage(&mut self, release: &ReleaseDescriptor) -> Result<UpdateState, UpdateError> {
        self.state = UpdateState::FirmwareUpdating;
        let url = release.asset_url(&self.config.firmware_name);
        self.download_and_apply(PartitionTarget::Firmware, &url)?;

        // Must be durable before the restart: on failure here we abort
        // without rebooting, otherwise the next boot could not reconcile
        // which stage it is in.
        self.marker.set()?;

        log::info!("Firmware stage complete; requesting restart");
        self.reboot.restart();
        // Terminal for this instance; the next boot resumes via the marker.
        Ok(UpdateState::FirmwareUpdating)
    }

    fn filesystem_stage(&mut self, release: &ReleaseDescriptor) -> Result<UpdateState, UpdateError> {
        self.state = UpdateState::FsUpdating;
        let url = release.asset_url(&self.config.filesystem_name);
        self.download_and_apply(PartitionTarget::Filesystem, &url)?;

        // Non-fatal: worst case the next cycle re-applies the filesystem
        // stage, which is idempotent.
        if let Err(err) = self.marker.clear() {
            log::warn!("Could not clear pending marker: {err}");
        }

        log::info!("Filesystem stage complete; requesting restart");
        self.reboot.restart();
        Ok(UpdateState::Done)
    }

    fn download_and_apply(
        &mut self,
        target: PartitionTarget,
        url: &str,
    ) -> Result<(), UpdateError> {
        log::info!("Downloading {target} image from {url}");
        self.events.update_started(target);

        let response = self.http.get(url, RedirectPolicy::Follow)?;
        if !(200..300).contains(&response.status) {
            return Err(UpdateError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let total = response.content_length;
        let mut image = ProgressReader::new(response.body, total, &mut *self.events);
        self.applier.apply(target, &mut image)?;
        drop(image);

        self.events.update_finished(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use std::collections::HashMap;
    use std::io::{self, Cursor, Read};

    const FEED: &str = "https://api.host/repos/owner/fw/releases/latest";
    const API_BODY_1_4_0: &str =
        r#"{"name":"1.4.0","html_url":"https://host/releases/tag/1.4.0"}"#;
    const FW_URL_1_4_0: &str = "https://host/releases/download/1.4.0/firmware.bin";
    const FS_URL_1_4_0: &str = "https://host/releases/download/1.4.0/filesystem.bin";

    struct Route {
        status: u16,
        location: Option<String>,
        body: Vec<u8>,
    }

    #[derive(Default)]
    struct MockHttp {
        routes: HashMap<String, Route>,
        requests: Vec<(String, RedirectPolicy)>,
        fail_next: bool,
    }

    impl MockHttp {
        fn route(&mut self, url: &str, status: u16, body: &[u8]) {
            self.routes.insert(
                url.to_string(),
                Route {
                    status,
                    location: None,
                    body: body.to_vec(),
                },
            );
        }

        fn route_redirect(&mut self, url: &str, location: &str) {
            self.routes.insert(
                url.to_string(),
                Route {
                    status: 302,
                    location: Some(location.to_string()),
                    body: Vec::new(),
                },
            );
        }

        fn requested(&self, url: &str) -> bool {
            self.requests.iter().any(|(u, _)| u == url)
        }
    }

    impl HttpClient for MockHttp {
        fn get<'a>(
            &'a mut self,
            url: &str,
            redirects: RedirectPolicy,
        ) -> Result<HttpResponse<'a>, UpdateError> {
            self.requests.push((url.to_string(), redirects));
            if self.fail_next {
                self.fail_next = false;
                return Err(UpdateError::Connect("connection reset".to_string()));
            }
            let route = self
                .routes
                .get(url)
                .ok_or_else(|| UpdateError::Connect(format!("no route for {url}")))?;
            Ok(HttpResponse {
                status: route.status,
                location: route.location.clone(),
                content_length: Some(route.body.len() as u64),
                body: Box::new(Cursor::new(route.body.clone())),
            })
        }
    }

    #[derive(Default)]
    struct MockApplier {
        applied: Vec<(PartitionTarget, Vec<u8>)>,
        fail_firmware: bool,
        fail_filesystem: bool,
    }

    impl Applier for MockApplier {
        fn apply(
            &mut self,
            target: PartitionTarget,
            image: &mut dyn Read,
        ) -> Result<(), UpdateError> {
            let fail = match target {
                PartitionTarget::Firmware => self.fail_firmware,
                PartitionTarget::Filesystem => self.fail_filesystem,
            };
            if fail {
                return Err(UpdateError::Apply(format!("forced {target} failure")));
            }
            let mut bytes = Vec::new();
            image
                .read_to_end(&mut bytes)
                .map_err(|err: io::Error| UpdateError::Apply(err.to_string()))?;
            self.applied.push((target, bytes));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RebootSpy {
        requests: u32,
    }

    impl Reboot for RebootSpy {
        fn restart(&mut self) {
            self.requests += 1;
        }
    }

    struct SyncOk;
    impl TimeSync for SyncOk {
        fn ensure_synced(&mut self, _timeout: Duration) -> Result<(), UpdateError> {
            Ok(())
        }
    }

    struct SyncTimesOut;
    impl TimeSync for SyncTimesOut {
        fn ensure_synced(&mut self, _timeout: Duration) -> Result<(), UpdateError> {
            Err(UpdateError::Connect("time sync timed out".to_string()))
        }
    }

    #[derive(Default)]
    struct EventLog {
        started: Vec<PartitionTarget>,
        finished: Vec<PartitionTarget>,
        errors: Vec<String>,
        last_progress: Option<(u64, Option<u64>)>,
    }

    impl UpdateEvents for EventLog {
        fn update_started(&mut self, target: PartitionTarget) {
            self.started.push(target);
        }
        fn update_progress(&mut self, received: u64, total: Option<u64>) {
            self.last_progress = Some((received, total));
        }
        fn update_error(&mut self, error: &UpdateError) {
            self.errors.push(error.to_string());
        }
        fn update_finished(&mut self, target: PartitionTarget) {
            self.finished.push(target);
        }
    }

    fn temp_marker(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ota_agent_marker_{tag}_{}", std::process::id()))
    }

    fn config(tag: &str, current: &str, strategy: ResolutionStrategy) -> OtaConfig {
        let mut config = OtaConfig::new(Version::parse(current).unwrap(), FEED, strategy);
        config.marker_path = temp_marker(tag);
        config
    }

    // Scenario A: API feed has 1.4.0, device runs 1.3.0. Firmware stage runs,
    // marker is set, restart is requested; filesystem asset is not touched.
    #[test]
    fn api_update_runs_firmware_stage_and_sets_marker() -> anyhow::Result<()> {
        let config = config("scenario_a", "1.3.0", ResolutionStrategy::ReleaseApi);
        PendingMarker::at(&config.marker_path).clear()?;

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FW_URL_1_4_0, 200, b"firmware-image");

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;
        let marker_path = config.marker_path.clone();

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        let state = agent.handle();

        assert_eq!(state, UpdateState::FirmwareUpdating);
        assert_eq!(applier.applied.len(), 1);
        assert_eq!(applier.applied[0].0, PartitionTarget::Firmware);
        assert_eq!(applier.applied[0].1, b"firmware-image");
        assert!(http.requested(FW_URL_1_4_0));
        assert!(!http.requested(FS_URL_1_4_0));
        assert_eq!(reboot.requests, 1);
        assert_eq!(events.started, vec![PartitionTarget::Firmware]);
        assert_eq!(events.finished, vec![PartitionTarget::Firmware]);
        assert_eq!(events.last_progress, Some((14, Some(14))));

        let marker = PendingMarker::at(&marker_path);
        assert!(marker.exists());
        marker.clear()?;
        Ok(())
    }

    // Scenario B: redirect feed reports the running version. No download, no
    // reboot, state Done.
    #[test]
    fn equal_version_is_a_noop_done() {
        let config = config("scenario_b", "2.0.0", ResolutionStrategy::Redirect);
        PendingMarker::at(&config.marker_path).clear().unwrap();

        let mut http = MockHttp::default();
        http.route_redirect(FEED, "https://host/releases/tag/2.0.0");

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        let state = agent.handle();

        assert_eq!(state, UpdateState::Done);
        assert!(applier.applied.is_empty());
        assert_eq!(reboot.requests, 0);
        assert_eq!(http.requests.len(), 1);
    }

    #[test]
    fn older_feed_version_never_triggers_apply() {
        let config = config("no_downgrade", "1.5.0", ResolutionStrategy::ReleaseApi);
        PendingMarker::at(&config.marker_path).clear().unwrap();

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );

        assert_eq!(agent.handle(), UpdateState::Done);
        assert!(applier.applied.is_empty());
        assert_eq!(reboot.requests, 0);
    }

    // Scenario C: marker present, feed still reports the running version.
    // The version comparison is skipped and only the filesystem stage runs.
    #[test]
    fn pending_marker_resumes_filesystem_stage() {
        let config = config("scenario_c", "1.4.0", ResolutionStrategy::ReleaseApi);
        let marker = PendingMarker::at(&config.marker_path);
        marker.set().unwrap();

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FS_URL_1_4_0, 200, b"fs-image");

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        let state = agent.handle();

        assert_eq!(state, UpdateState::Done);
        assert_eq!(applier.applied.len(), 1);
        assert_eq!(applier.applied[0].0, PartitionTarget::Filesystem);
        assert!(!http.requested(FW_URL_1_4_0));
        assert_eq!(reboot.requests, 1);
        assert!(!marker.exists());
    }

    #[test]
    fn firmware_apply_failure_leaves_marker_clear() {
        let config = config("fw_fail", "1.3.0", ResolutionStrategy::ReleaseApi);
        let marker = PendingMarker::at(&config.marker_path);
        marker.clear().unwrap();

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FW_URL_1_4_0, 200, b"firmware-image");

        let mut applier = MockApplier {
            fail_firmware: true,
            ..Default::default()
        };
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        let state = agent.handle();

        assert_eq!(state, UpdateState::Failed);
        assert!(!marker.exists());
        assert_eq!(reboot.requests, 0);
        assert_eq!(events.errors.len(), 1);
    }

    // Failure isolation: a filesystem-stage failure keeps the marker, and the
    // retry cycle fetches only the filesystem asset.
    #[test]
    fn filesystem_failure_retries_only_filesystem_stage() {
        let config = config("fs_fail", "1.4.0", ResolutionStrategy::ReleaseApi);
        let marker = PendingMarker::at(&config.marker_path);
        marker.set().unwrap();

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FS_URL_1_4_0, 200, b"fs-image");

        let mut applier = MockApplier {
            fail_filesystem: true,
            ..Default::default()
        };
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config.clone(),
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        assert_eq!(agent.handle(), UpdateState::Failed);
        assert!(marker.exists());
        assert_eq!(reboot.requests, 0);

        // Next cycle: apply succeeds, only the filesystem asset is fetched.
        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FS_URL_1_4_0, 200, b"fs-image");
        let mut applier = MockApplier::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        assert_eq!(agent.handle(), UpdateState::Done);
        assert!(http.requested(FS_URL_1_4_0));
        assert!(!http.requested(FW_URL_1_4_0));
        assert!(!marker.exists());
        assert_eq!(reboot.requests, 1);
    }

    #[test]
    fn unresolved_feed_fails_the_cycle() {
        let config = config("unresolved", "1.0.0", ResolutionStrategy::ReleaseApi);
        PendingMarker::at(&config.marker_path).clear().unwrap();

        let mut http = MockHttp::default();
        http.route(FEED, 500, b"");

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        assert_eq!(agent.handle(), UpdateState::Failed);
        assert!(applier.applied.is_empty());
        assert_eq!(events.errors.len(), 1);
    }

    #[test]
    fn marker_set_failure_aborts_without_restart() {
        let mut config = config("marker_fatal", "1.3.0", ResolutionStrategy::ReleaseApi);
        // Unwritable marker location: parent directory does not exist.
        config.marker_path = temp_marker("marker_fatal").join("nested/never_created");

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FW_URL_1_4_0, 200, b"firmware-image");

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        assert_eq!(agent.handle(), UpdateState::Failed);
        // Firmware was applied, but the restart must not be requested when
        // the marker could not be persisted.
        assert_eq!(applier.applied.len(), 1);
        assert_eq!(reboot.requests, 0);
        assert!(events.errors[0].contains("pending marker"));
    }

    #[test]
    fn time_sync_timeout_fails_before_any_request() {
        let config = config("time_sync", "1.0.0", ResolutionStrategy::ReleaseApi);
        PendingMarker::at(&config.marker_path).clear().unwrap();

        let mut http = MockHttp::default();
        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncTimesOut;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );
        assert_eq!(agent.handle(), UpdateState::Failed);
        assert!(http.requests.is_empty());
    }

    // Done and Failed are non-sticky: the cycle after a failure starts over
    // at Checking and can succeed.
    #[test]
    fn failed_state_does_not_stick() {
        let config = config("non_sticky", "1.3.0", ResolutionStrategy::ReleaseApi);
        PendingMarker::at(&config.marker_path).clear().unwrap();
        let marker_path = config.marker_path.clone();

        let mut http = MockHttp::default();
        http.route(FEED, 200, API_BODY_1_4_0.as_bytes());
        http.route(FW_URL_1_4_0, 200, b"firmware-image");
        http.fail_next = true;

        let mut applier = MockApplier::default();
        let mut reboot = RebootSpy::default();
        let mut events = EventLog::default();
        let mut sync = SyncOk;

        let mut agent = OtaAgent::new(
            config,
            &mut http,
            &mut applier,
            &mut sync,
            &mut reboot,
            &mut events,
        );

        // First cycle: feed unreachable.
        assert_eq!(agent.handle(), UpdateState::Failed);

        // Feed comes back; the same agent instance recovers.
        assert_eq!(agent.handle(), UpdateState::FirmwareUpdating);

        PendingMarker::at(&marker_path).clear().unwrap();
    }
}
