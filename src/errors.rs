//! Error types for the topology state machine and its collaborators

use crate::topology::{CmdKind, NodeId, NodeState, TransitionState};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TopologyError>;

/// A persisted or wire string that does not name any variant of an enum.
///
/// Never defaulted: the offending string is carried back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot map name '{value}' to {kind}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Errors raised while admitting, applying or fencing topology changes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// A topology operation is already in flight; retry once the cluster is quiescent
    #[error("topology is busy (transition state: {transition_state:?}, transitioning nodes: {transitioning})")]
    Busy {
        transition_state: Option<TransitionState>,
        transitioning: usize,
    },

    /// The caller computed its work against an outdated topology
    #[error("stale topology: caller fencing version {caller}, current fence version {current}")]
    StaleTopology { caller: u64, current: u64 },

    /// A long-running operation belongs to a session that is no longer current
    #[error("stale topology session: operation session {operation}, current session {current}")]
    StaleSession { operation: String, current: String },

    #[error(transparent)]
    Parse(#[from] ParseEnumError),

    /// The aggregate broke one of its invariants; the apply is aborted
    #[error("topology invariant violated: {0}")]
    InvariantViolation(String),

    #[error("node {0} is already part of the topology")]
    NodeExists(NodeId),

    #[error("node {0} has left the cluster and its id cannot be reused")]
    NodeLeft(NodeId),

    #[error("node {0} is not part of the topology")]
    UnknownNode(NodeId),

    #[error("node {node} is in state {state}, expected {expected}")]
    InvalidNodeState {
        node: NodeId,
        state: NodeState,
        expected: String,
    },

    #[error("node {0} already has a pending request")]
    RequestPending(NodeId),

    #[error("illegal transition state change from {from:?} to {to:?}")]
    InvalidTransition {
        from: Option<TransitionState>,
        to: Option<TransitionState>,
    },

    #[error("command requires transition state {expected}, topology is in {actual:?}")]
    WrongTransitionState {
        expected: TransitionState,
        actual: Option<TransitionState>,
    },

    #[error("node {requested} is not next in request priority order (next is {next:?})")]
    NotNextInPriority {
        requested: NodeId,
        next: Option<NodeId>,
    },

    #[error("node {node} must be assigned {expected} tokens, got {actual}")]
    TokenCountMismatch {
        node: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("token {token} assigned to node {node} is already owned by node {owner}")]
    TokenConflict {
        node: NodeId,
        owner: NodeId,
        token: i64,
    },

    #[error("node {node} asked for {num_tokens} tokens; a node owns between 1 and 4096")]
    InvalidTokenCount { node: NodeId, num_tokens: u32 },

    #[error("tokens of replacing node {node} must be exactly those of {replaced}")]
    TokenMismatch { node: NodeId, replaced: NodeId },

    #[error("features {missing:?} are enabled in the cluster but not supported by node {node}")]
    UnsupportedFeatures { node: NodeId, missing: Vec<String> },

    #[error("features {0:?} are not supported by every normal node or are already enabled")]
    FeatureNotReady(Vec<String>),

    /// Installing the snapshot would move the topology back in time
    #[error("snapshot at version {snapshot} is behind the current topology version {current}")]
    SnapshotBehind { snapshot: u64, current: u64 },

    #[error("cdc generation ledger: {0}")]
    CdcLedger(String),

    #[error("a global topology request is already pending")]
    GlobalRequestPending,

    #[error("no global topology request is pending")]
    NoGlobalRequest,

    #[error("node {node}: illegal cleanup transition {from} -> {to}")]
    InvalidCleanupTransition {
        node: NodeId,
        from: String,
        to: String,
    },

    /// A peer answered `fail` to a topology command
    #[error("topology command {cmd} failed on node {node}")]
    CommandFailed { node: NodeId, cmd: CmdKind },

    #[error("topology command {cmd} timed out")]
    CommandTimeout { cmd: CmdKind },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TopologyError {
    /// Whether the caller may retry after refreshing its view of the topology.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TopologyError::Busy { .. }
                | TopologyError::StaleTopology { .. }
                | TopologyError::StaleSession { .. }
                | TopologyError::CommandFailed { .. }
                | TopologyError::CommandTimeout { .. }
                | TopologyError::Transport(_)
        )
    }
}

impl From<serde_json::Error> for TopologyError {
    fn from(e: serde_json::Error) -> Self {
        TopologyError::Serialization(e.to_string())
    }
}

/// Errors that can occur while delivering topology commands to peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer node not registered with the transport
    PeerNotFound { node_id: NodeId },

    /// Failed to deliver the command
    SendFailed { node_id: NodeId, reason: String },

    /// The commit log refused or lost a proposal
    CommitFailed { reason: String },

    /// Other transport error
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::PeerNotFound { node_id } => {
                write!(f, "Peer node {} not found in registry", node_id)
            }
            TransportError::SendFailed { node_id, reason } => {
                write!(f, "Failed to send command to node {}: {}", node_id, reason)
            }
            TransportError::CommitFailed { reason } => {
                write!(f, "Failed to commit topology command: {}", reason)
            }
            TransportError::Other(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}
