// SNTP wall-clock sync and device restart on ESP-IDF.

use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use esp_idf_svc::sntp::{EspSntp, SyncStatus};

use crate::error::UpdateError;
use crate::platform::{Reboot, TimeSync};

// Anything later than this is a synced clock; the ESP boots at the epoch.
const CLOCK_VALID_AFTER_SECS: u64 = 8 * 3600 * 2;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SntpTimeSync {
    synced: bool,
}

impl SntpTimeSync {
    pub fn new() -> Self {
        Self { synced: false }
    }
}

impl Default for SntpTimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSync for SntpTimeSync {
    /// Bounded wait for SNTP sync. The original firmware spun forever here;
    /// a dead NTP path must fail the cycle, not hang the device.
    fn ensure_synced(&mut self, timeout: Duration) -> Result<(), UpdateError> {
        if self.synced || clock_is_valid() {
            self.synced = true;
            return Ok(());
        }

        let sntp =
            EspSntp::new_default().map_err(|err| UpdateError::Connect(err.to_string()))?;
        let deadline = Instant::now() + timeout;
        while sntp.get_sync_status() != SyncStatus::Completed {
            if Instant::now() >= deadline {
                return Err(UpdateError::Connect(format!(
                    "SNTP sync timed out after {timeout:?}"
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }

        self.synced = true;
        log::info!("System time synchronized via SNTP");
        Ok(())
    }
}

fn clock_is_valid() -> bool {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() > CLOCK_VALID_AFTER_SECS)
        .unwrap_or(false)
}

pub struct EspReboot;

impl Reboot for EspReboot {
    fn restart(&mut self) {
        log::info!("Restarting device");
        // Let the serial console drain before the reset.
        thread::sleep(Duration::from_secs(1));
        unsafe { esp_idf_sys::esp_restart() }
    }
}
