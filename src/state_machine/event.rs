//! Events emitted by the topology state machine

use crate::topology::{
    CdcGenerationId, CleanupStatus, GlobalTopologyRequest, NodeId, NodeState, TopologyRequest,
    TransitionState, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A node request was queued
    RequestQueued {
        node: NodeId,
        request: TopologyRequest,
    },

    GlobalRequestQueued {
        request: GlobalTopologyRequest,
    },

    /// A queued request moved its node into `transition_nodes`
    OperationStarted {
        node: NodeId,
        request: TopologyRequest,
        state: NodeState,
    },

    TokensAssigned {
        node: NodeId,
        count: usize,
    },

    TransitionChanged {
        from: Option<TransitionState>,
        to: Option<TransitionState>,
    },

    NodeBecameNormal {
        node: NodeId,
    },

    NodeLeft {
        node: NodeId,
    },

    OperationAborted {
        node: NodeId,
        reason: String,
    },

    CleanupStatusChanged {
        node: NodeId,
        status: CleanupStatus,
    },

    GlobalRequestStarted {
        request: GlobalTopologyRequest,
    },

    CdcGenerationStaged {
        data_uuid: Uuid,
    },

    CdcGenerationCommitted {
        generation: CdcGenerationId,
    },

    CdcGenerationPublished {
        generation: CdcGenerationId,
    },

    SupportedFeaturesChanged {
        node: NodeId,
    },

    FeaturesEnabled {
        features: BTreeSet<String>,
    },

    TabletBalancingChanged {
        enabled: bool,
    },

    /// The fence version moved; fenced work issued below `fence_version` is now stale
    Fenced {
        fence_version: Version,
    },
}
