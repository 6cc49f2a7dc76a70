// Semantic version value used to gate updates.
//
// Ordering is lexicographic on (major, minor, patch). A prerelease suffix is
// parsed and rendered but ignored by the comparison; the original firmware
// behaved that way and deployments depend on it.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    /// Parses `major.minor.patch[-prerelease]`. GitHub tags commonly carry a
    /// leading `v`, so a single one is tolerated.
    pub fn parse(text: &str) -> Result<Self, UpdateError> {
        let text = text.trim();
        let text = text
            .strip_prefix('v')
            .or_else(|| text.strip_prefix('V'))
            .unwrap_or(text);

        let mut segments = text.splitn(3, '.');
        let major = parse_segment(segments.next(), text, "major")?;
        let minor = parse_segment(segments.next(), text, "minor")?;

        let rest = segments
            .next()
            .ok_or_else(|| UpdateError::Parse(format!("missing patch segment in '{text}'")))?;
        let (patch_text, prerelease) = match rest.split_once('-') {
            Some((patch, pre)) => (patch, Some(pre.to_string())),
            None => (rest, None),
        };
        let patch = parse_segment(Some(patch_text), text, "patch")?;

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

fn parse_segment(segment: Option<&str>, text: &str, name: &str) -> Result<u32, UpdateError> {
    let segment =
        segment.ok_or_else(|| UpdateError::Parse(format!("missing {name} segment in '{text}'")))?;
    segment
        .parse::<u32>()
        .map_err(|_| UpdateError::Parse(format!("non-numeric {name} segment in '{text}'")))
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}
