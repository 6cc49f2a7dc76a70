// Applier capability: streams a downloaded image into a flash partition and
// verifies it. The flash mechanics live behind this trait; the agent only
// sequences the two stages.

use std::fmt;
use std::io::Read;

use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTarget {
    Firmware,
    Filesystem,
}

impl fmt::Display for PartitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionTarget::Firmware => write!(f, "firmware"),
            PartitionTarget::Filesystem => write!(f, "filesystem"),
        }
    }
}

pub trait Applier {
    /// Writes the full byte stream into the target partition. Implementations
    /// perform their own integrity verification before returning `Ok`.
    fn apply(&mut self, target: PartitionTarget, image: &mut dyn Read) -> Result<(), UpdateError>;
}
