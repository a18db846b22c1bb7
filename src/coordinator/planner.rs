//! Phase planning
//!
//! Pure functions deciding what the coordinator does next for a given
//! topology. They take a snapshot and return an action list; executing the
//! actions and re-planning against the resulting topology drives every
//! operation to completion one phase at a time.

use super::barrier::global_targets;
use crate::state_machine::TopologyCommand;
use crate::topology::{
    CmdKind, NodeId, NodeState, ReplicaState, RequestParam, Topology, TopologyRequest,
    TransitionState,
};
use std::collections::BTreeSet;
use uuid::Uuid;

/// One step of the coordinator's work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Commit a fully determined command
    Propose(TopologyCommand),

    /// Send a protocol command to `targets` at the current topology version
    Broadcast {
        cmd: CmdKind,
        targets: BTreeSet<NodeId>,
    },

    /// Start `node`'s queued request under a fresh session
    StartOperation { node: NodeId },

    /// Give a joining node `count` tokens nobody owns
    AssignRandomTokens { node: NodeId, count: usize },

    /// Stage data for a fresh CDC generation
    StageCdcGeneration,

    /// Commit the staged generation, timestamped by the coordinator
    CommitCdcGeneration { data_uuid: Uuid },
}

/// The queued request that must start next, if any
pub fn next_request(topology: &Topology) -> Option<(NodeId, TopologyRequest)> {
    topology.next_request()
}

/// Decide the next step. An empty list means there is nothing to do.
pub fn plan(topology: &Topology) -> Vec<CoordinatorAction> {
    if let Some((node, rs)) = topology.transition_nodes.iter().next() {
        return plan_node_operation(topology, *node, rs);
    }

    match topology.transition_state {
        Some(TransitionState::CommitCdcGeneration) => return plan_cdc_commit(topology),
        Some(TransitionState::TabletMigration) | Some(TransitionState::TabletDraining) => {
            return vec![
                barrier(CmdKind::Barrier, topology),
                advance(None),
            ];
        }
        // Node phases without a transitioning node cannot be finished here
        Some(_) => return Vec::new(),
        None => {}
    }

    if !topology.cdc.unpublished_cdc_generations.is_empty() {
        return vec![
            barrier(CmdKind::Barrier, topology),
            CoordinatorAction::Propose(TopologyCommand::PublishCdcGeneration),
        ];
    }
    if let Some((node, _)) = next_request(topology) {
        return vec![CoordinatorAction::StartOperation { node }];
    }
    if topology.global_request.is_some() {
        return vec![CoordinatorAction::Propose(
            TopologyCommand::StartGlobalRequest,
        )];
    }
    Vec::new()
}

fn barrier(cmd: CmdKind, topology: &Topology) -> CoordinatorAction {
    CoordinatorAction::Broadcast {
        cmd,
        targets: global_targets(topology),
    }
}

fn advance(to: Option<TransitionState>) -> CoordinatorAction {
    CoordinatorAction::Propose(TopologyCommand::AdvanceTransition { to })
}

fn complete(node: NodeId) -> CoordinatorAction {
    CoordinatorAction::Propose(TopologyCommand::CompleteNodeOperation { node })
}

/// Nodes that stream data for `node`'s operation
fn stream_targets(topology: &Topology, node: NodeId, state: NodeState) -> BTreeSet<NodeId> {
    match state {
        // Data of a dead node is rebuilt by the surviving replicas
        NodeState::Removing => {
            let excluded = topology.get_excluded_nodes();
            topology
                .normal_nodes
                .keys()
                .filter(|id| !excluded.contains(id))
                .copied()
                .collect()
        }
        _ => BTreeSet::from([node]),
    }
}

fn plan_cdc_commit(topology: &Topology) -> Vec<CoordinatorAction> {
    match topology.cdc.new_cdc_generation_data_uuid {
        None => vec![CoordinatorAction::StageCdcGeneration],
        Some(data_uuid) => vec![
            barrier(CmdKind::Barrier, topology),
            CoordinatorAction::CommitCdcGeneration { data_uuid },
        ],
    }
}

fn plan_node_operation(topology: &Topology, node: NodeId, rs: &ReplicaState) -> Vec<CoordinatorAction> {
    use TransitionState::*;

    match (rs.state, topology.transition_state) {
        (NodeState::Bootstrapping | NodeState::Replacing, Some(JoinGroup0)) => {
            if rs.ring.is_some() {
                // Only a join introduces new token ranges, and with them a CDC generation
                let next = if rs.state == NodeState::Bootstrapping {
                    CommitCdcGeneration
                } else {
                    WriteBothReadOld
                };
                return vec![advance(Some(next))];
            }
            let assign = match topology.get_request_param(&node) {
                Some(RequestParam::Join { num_tokens }) => CoordinatorAction::AssignRandomTokens {
                    node,
                    count: *num_tokens as usize,
                },
                Some(RequestParam::Replace { replaced_id, .. }) => {
                    let tokens = topology
                        .normal_nodes
                        .get(replaced_id)
                        .and_then(|replaced| replaced.ring.as_ref())
                        .map(|ring| ring.tokens.clone())
                        .unwrap_or_default();
                    CoordinatorAction::Propose(TopologyCommand::AssignTokens { node, tokens })
                }
                _ => return Vec::new(),
            };
            vec![barrier(CmdKind::WaitForIp, topology), assign]
        }

        (_, Some(CommitCdcGeneration)) => plan_cdc_commit(topology),

        (
            NodeState::Bootstrapping
            | NodeState::Replacing
            | NodeState::Decommissioning
            | NodeState::Removing,
            Some(WriteBothReadOld),
        ) => vec![
            barrier(CmdKind::BarrierAndDrain, topology),
            CoordinatorAction::Broadcast {
                cmd: CmdKind::StreamRanges,
                targets: stream_targets(topology, node, rs.state),
            },
            advance(Some(WriteBothReadNew)),
        ],

        (NodeState::Decommissioning, Some(WriteBothReadNew)) => vec![
            barrier(CmdKind::BarrierAndDrain, topology),
            advance(Some(LeftTokenRing)),
        ],

        (
            NodeState::Bootstrapping | NodeState::Replacing | NodeState::Removing,
            Some(WriteBothReadNew),
        ) => vec![barrier(CmdKind::BarrierAndDrain, topology), complete(node)],

        (NodeState::Decommissioning, Some(LeftTokenRing)) => {
            vec![barrier(CmdKind::Barrier, topology), complete(node)]
        }

        (NodeState::Rebuilding, None) => vec![
            CoordinatorAction::Broadcast {
                cmd: CmdKind::StreamRanges,
                targets: BTreeSet::from([node]),
            },
            complete(node),
        ],

        (NodeState::RollbackToNormal, None) => {
            vec![barrier(CmdKind::Barrier, topology), complete(node)]
        }

        _ => Vec::new(),
    }
}
