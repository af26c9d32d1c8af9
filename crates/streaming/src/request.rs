use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of an image station, as issued by the descriptor provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One revision of one station: the unit that is downloaded and cached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionKey {
    pub station: StationId,
    pub revision: usize,
}

impl RevisionKey {
    pub fn new(station: StationId, revision: usize) -> Self {
        Self { station, revision }
    }
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.station, self.revision)
    }
}

/// Identifies one started download.
///
/// A key can be downloaded again after an abort, so completion paths match on
/// this id rather than on the key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DownloadId(pub u64);
