//! Commands committed through consensus and applied to the topology

use crate::topology::{
    CdcGenerationId, CleanupStatus, GlobalTopologyRequest, NodeId, NodeInfo, SessionId, Token,
    TransitionState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A committed topology mutation.
///
/// Handlers never touch the aggregate directly: they propose one of these,
/// and every replica applies it once consensus commits it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyCommand {
    /// A new node asks to bootstrap with `num_tokens` tokens
    RequestJoin {
        node: NodeId,
        info: NodeInfo,
        num_tokens: u32,
        request_id: Uuid,
    },

    /// A new node asks to take over the tokens of a dead normal node
    RequestReplace {
        node: NodeId,
        info: NodeInfo,
        replaced_id: NodeId,
        ignored_ids: BTreeSet<NodeId>,
        request_id: Uuid,
    },

    /// A normal node asks to decommission itself
    RequestLeave { node: NodeId, request_id: Uuid },

    /// An operator asks to remove a dead normal node
    RequestRemove {
        node: NodeId,
        ignored_ids: BTreeSet<NodeId>,
        request_id: Uuid,
    },

    /// A normal node asks to re-stream its data from `source_dc`
    RequestRebuild {
        node: NodeId,
        source_dc: String,
        request_id: Uuid,
    },

    RequestGlobal { request: GlobalTopologyRequest },

    /// Move the highest-priority queued request into `transition_nodes`
    StartNodeOperation { node: NodeId, session: SessionId },

    /// Give a bootstrapping or replacing node its ring
    AssignTokens { node: NodeId, tokens: BTreeSet<Token> },

    AdvanceTransition { to: Option<TransitionState> },

    /// Finish the operation of a transitioning node (it becomes normal or leaves)
    CompleteNodeOperation { node: NodeId },

    /// Roll back a failed decommission or removenode
    AbortNodeOperation { node: NodeId, reason: String },

    /// Start executing the pending global request
    StartGlobalRequest,

    StageCdcGeneration { data_uuid: Uuid },

    CommitCdcGeneration { generation: CdcGenerationId },

    PublishCdcGeneration,

    SetCleanupStatus { node: NodeId, status: CleanupStatus },

    UpdateSupportedFeatures {
        node: NodeId,
        features: BTreeSet<String>,
    },

    EnableFeatures { features: BTreeSet<String> },

    SetTabletBalancing { enabled: bool },
}

impl TopologyCommand {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TopologyCommand::RequestJoin { .. } => "request_join",
            TopologyCommand::RequestReplace { .. } => "request_replace",
            TopologyCommand::RequestLeave { .. } => "request_leave",
            TopologyCommand::RequestRemove { .. } => "request_remove",
            TopologyCommand::RequestRebuild { .. } => "request_rebuild",
            TopologyCommand::RequestGlobal { .. } => "request_global",
            TopologyCommand::StartNodeOperation { .. } => "start_node_operation",
            TopologyCommand::AssignTokens { .. } => "assign_tokens",
            TopologyCommand::AdvanceTransition { .. } => "advance_transition",
            TopologyCommand::CompleteNodeOperation { .. } => "complete_node_operation",
            TopologyCommand::AbortNodeOperation { .. } => "abort_node_operation",
            TopologyCommand::StartGlobalRequest => "start_global_request",
            TopologyCommand::StageCdcGeneration { .. } => "stage_cdc_generation",
            TopologyCommand::CommitCdcGeneration { .. } => "commit_cdc_generation",
            TopologyCommand::PublishCdcGeneration => "publish_cdc_generation",
            TopologyCommand::SetCleanupStatus { .. } => "set_cleanup_status",
            TopologyCommand::UpdateSupportedFeatures { .. } => "update_supported_features",
            TopologyCommand::EnableFeatures { .. } => "enable_features",
            TopologyCommand::SetTabletBalancing { .. } => "set_tablet_balancing",
        }
    }
}
