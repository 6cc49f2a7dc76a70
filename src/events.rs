// Event surface. The embedding firmware observes update outcomes only
// through these callbacks; the agent never panics or returns errors across
// the embedding boundary.

use std::io::{self, Read};

use crate::applier::PartitionTarget;
use crate::error::UpdateError;

pub trait UpdateEvents {
    fn update_started(&mut self, _target: PartitionTarget) {}
    fn update_progress(&mut self, _received: u64, _total: Option<u64>) {}
    fn update_error(&mut self, _error: &UpdateError) {}
    fn update_finished(&mut self, _target: PartitionTarget) {}
}

/// Default sink: forwards everything to the `log` facade. Progress is only
/// reported on whole-percent changes to keep the serial console readable.
pub struct LogEvents {
    last_percent: Option<u8>,
}

impl LogEvents {
    pub fn new() -> Self {
        Self { last_percent: None }
    }
}

impl Default for LogEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateEvents for LogEvents {
    fn update_started(&mut self, target: PartitionTarget) {
        self.last_percent = None;
        log::info!("Update started: {target}");
    }

    fn update_progress(&mut self, received: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                let percent = ((received * 100) / total) as u8;
                if self.last_percent != Some(percent) {
                    self.last_percent = Some(percent);
                    log::info!("Update progress: {percent}% ({received}/{total})");
                }
            }
            _ => log::debug!("Update progress: {received} bytes"),
        }
    }

    fn update_error(&mut self, error: &UpdateError) {
        log::error!("Update error: {error}");
    }

    fn update_finished(&mut self, target: PartitionTarget) {
        log::info!("Update finished: {target}");
    }
}

/// Counts bytes flowing out of a response body and reports them to the event
/// sink, so appliers stay dumb byte pipes.
pub struct ProgressReader<'a, R: Read> {
    inner: R,
    events: &'a mut dyn UpdateEvents,
    received: u64,
    total: Option<u64>,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, total: Option<u64>, events: &'a mut dyn UpdateEvents) -> Self {
        Self {
            inner,
            events,
            received: 0,
            total,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.received += n as u64;
            self.events.update_progress(self.received, self.total);
        }
        Ok(n)
    }
}
