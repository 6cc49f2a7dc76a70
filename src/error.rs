// Error taxonomy for the update agent. Resolution-time errors degrade the
// cycle to Failed; retry is delegated entirely to the next scheduled call.

use std::fmt;

#[derive(Debug)]
pub enum UpdateError {
    /// Transport or TLS failure, including time-sync timeout before TLS.
    Connect(String),
    /// Unexpected HTTP status for the active resolution strategy.
    HttpStatus { url: String, status: u16 },
    /// Malformed JSON, malformed version text, or a missing expected field.
    Parse(String),
    /// Reported by the partition applier.
    Apply(String),
    /// Persistent-storage write/delete failure on the pending marker.
    MarkerIo(std::io::Error),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::Connect(msg) => write!(f, "connect failed: {msg}"),
            UpdateError::HttpStatus { url, status } => {
                write!(f, "unexpected HTTP status {status} from {url}")
            }
            UpdateError::Parse(msg) => write!(f, "parse error: {msg}"),
            UpdateError::Apply(msg) => write!(f, "apply failed: {msg}"),
            UpdateError::MarkerIo(err) => write!(f, "pending marker I/O error: {err}"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::MarkerIo(err) => Some(err),
            _ => None,
        }
    }
}
