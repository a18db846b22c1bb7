//! Fencing tokens attached to version-checked RPCs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topology version counter
pub type Version = u64;

/// Version of the topology the caller computed its work against.
///
/// `topology_version == 0` means the caller does not use fencing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FencingToken {
    pub topology_version: Version,
}

impl FencingToken {
    pub fn new(topology_version: Version) -> Self {
        Self { topology_version }
    }

    /// Token carried by callers that do not ask for fencing
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.topology_version != 0
    }
}

impl From<FencingToken> for bool {
    fn from(token: FencingToken) -> bool {
        token.is_set()
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.topology_version)
    }
}
