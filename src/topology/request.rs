//! Request parameters and request bookkeeping

use super::types::{NodeId, TopologyRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Operation-specific parameters of a node request.
///
/// Kept in `Topology::req_param` from admission until the node becomes normal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestParam {
    Join {
        num_tokens: u32,
    },
    Rebuild {
        source_dc: String,
    },
    Remove {
        ignored_ids: BTreeSet<NodeId>,
    },
    Replace {
        replaced_id: NodeId,
        ignored_ids: BTreeSet<NodeId>,
    },
}

impl RequestParam {
    /// The request kind this parameter shape belongs to
    pub fn request(&self) -> TopologyRequest {
        match self {
            RequestParam::Join { .. } => TopologyRequest::Join,
            RequestParam::Rebuild { .. } => TopologyRequest::Rebuild,
            RequestParam::Remove { .. } => TopologyRequest::Remove,
            RequestParam::Replace { .. } => TopologyRequest::Replace,
        }
    }

    /// Node being replaced, if this is a replace
    pub fn replaced_node(&self) -> Option<NodeId> {
        match self {
            RequestParam::Replace { replaced_id, .. } => Some(*replaced_id),
            RequestParam::Join { .. } | RequestParam::Rebuild { .. } | RequestParam::Remove { .. } => {
                None
            }
        }
    }

    /// Nodes the operator asked to ignore during synchronization
    pub fn ignored_nodes(&self) -> BTreeSet<NodeId> {
        match self {
            RequestParam::Remove { ignored_ids } | RequestParam::Replace { ignored_ids, .. } => {
                ignored_ids.clone()
            }
            RequestParam::Join { .. } | RequestParam::Rebuild { .. } => BTreeSet::new(),
        }
    }
}

impl TopologyRequest {
    /// Whether this request kind carries a `RequestParam`
    pub fn has_param(&self) -> bool {
        !matches!(self, TopologyRequest::Leave)
    }
}

/// Completion record of a request, keyed by request id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyRequestState {
    pub done: bool,
    /// Empty on success
    pub error: String,
}

impl TopologyRequestState {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn succeeded() -> Self {
        Self {
            done: true,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            error: error.into(),
        }
    }
}
