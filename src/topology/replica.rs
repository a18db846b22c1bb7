//! Per-node replica record

use super::types::{CleanupStatus, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// A position on the token ring
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub i64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The set of tokens a node owns
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSlice {
    pub tokens: BTreeSet<Token>,
}

impl RingSlice {
    pub fn new(tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Location, software and sharding facts a node reports when it asks to join
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub datacenter: String,
    pub rack: String,
    pub release_version: String,
    pub shard_count: usize,
    pub ignore_msb: u8,
    pub supported_features: BTreeSet<String>,
}

/// Everything the topology knows about one non-left node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub state: NodeState,
    pub datacenter: String,
    pub rack: String,
    pub release_version: String,
    /// Engaged once the node has been assigned ring ownership
    pub ring: Option<RingSlice>,
    pub shard_count: usize,
    pub ignore_msb: u8,
    pub supported_features: BTreeSet<String>,
    pub cleanup: CleanupStatus,
    /// Current request of the node, or the last one if none is in progress
    pub request_id: Uuid,
}

impl ReplicaState {
    /// Record for a node that has just been accepted into `new_nodes`
    pub fn new(info: NodeInfo, request_id: Uuid) -> Self {
        Self {
            state: NodeState::None,
            datacenter: info.datacenter,
            rack: info.rack,
            release_version: info.release_version,
            ring: None,
            shard_count: info.shard_count,
            ignore_msb: info.ignore_msb,
            supported_features: info.supported_features,
            cleanup: CleanupStatus::Clean,
            request_id,
        }
    }

    /// Number of owned tokens (zero if the ring is not engaged)
    pub fn token_count(&self) -> usize {
        self.ring.as_ref().map(RingSlice::len).unwrap_or(0)
    }
}
