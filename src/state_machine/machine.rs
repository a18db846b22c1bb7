//! Topology state machine
//!
//! Applies committed `TopologyCommand`s to the aggregate. Each command is
//! applied to a copy of the topology which is then validated; only a fully
//! valid result replaces the current state, so a rejected command leaves the
//! topology untouched on every replica alike.

use super::command::TopologyCommand;
use super::event::TopologyEvent;
use super::mutation::{self, MutationBatch, RaftTopologySnapshot};
use super::traits::StateMachine;
use crate::errors::{Result, TopologyError};
use crate::topology::{
    CdcGenerationId, CleanupStatus, GlobalTopologyRequest, NodeId, NodeInfo, NodeState,
    ReplicaState, RequestParam, RingSlice, SessionId, Token, Topology, TopologyRequest,
    TopologyRequestState, TransitionState, Version,
};
use slog::{crit, debug, info, warn, Logger};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Outcome of a successfully applied command
#[derive(Debug, Clone)]
pub struct AppliedCommand {
    /// Topology version after the apply
    pub version: Version,
    pub events: Vec<TopologyEvent>,
    /// Rows to hand to the mutation sink
    pub mutations: MutationBatch,
}

/// Largest token count a joining node may ask for
pub const MAX_TOKENS_PER_NODE: u32 = 4096;

pub struct TopologyStateMachine {
    topology: Topology,
    logger: Logger,
}

impl TopologyStateMachine {
    pub fn new(logger: Logger) -> Self {
        Self {
            topology: Topology::new(),
            logger,
        }
    }

    /// Start from a previously persisted topology
    pub fn from_topology(topology: Topology, logger: Logger) -> Result<Self> {
        topology.validate()?;
        Ok(Self { topology, logger })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn version(&self) -> Version {
        self.topology.version
    }

    /// Apply one committed command.
    ///
    /// On success the version has advanced by exactly one. On failure nothing
    /// changed.
    pub fn apply_command(&mut self, command: &TopologyCommand) -> Result<AppliedCommand> {
        let mut next = self.topology.clone();
        next.version += 1;

        let events = match apply_to(&mut next, command) {
            Ok(events) => events,
            Err(e) => {
                debug!(self.logger, "Rejected topology command";
                    "command" => command.name(),
                    "version" => self.topology.version,
                    "error" => %e
                );
                return Err(e);
            }
        };

        if let Err(e) = next.validate() {
            crit!(self.logger, "Topology command would break an invariant, apply aborted";
                "command" => command.name(),
                "version" => self.topology.version,
                "error" => %e
            );
            return Err(e);
        }

        let mutations = mutation::diff(Some(&self.topology), &next)?;
        self.topology = next;

        info!(self.logger, "Applied topology command";
            "command" => command.name(),
            "version" => self.topology.version,
            "fence_version" => self.topology.fence_version,
            "transition_state" => ?self.topology.transition_state
        );

        Ok(AppliedCommand {
            version: self.topology.version,
            events,
            mutations,
        })
    }

    /// Full state in the persisted row format
    pub fn snapshot_mutations(&self) -> Result<RaftTopologySnapshot> {
        mutation::snapshot(&self.topology)
    }

    /// Replace the state with one loaded from persisted rows
    pub fn restore_mutations(&mut self, snapshot: &RaftTopologySnapshot) -> Result<()> {
        let topology = mutation::load_snapshot(snapshot)?;
        self.check_not_behind(&topology)?;
        self.topology = topology;
        info!(self.logger, "Restored topology from snapshot";
            "version" => self.topology.version,
            "nodes" => self.topology.size()
        );
        Ok(())
    }

    /// A snapshot may only move the version and the fence forward
    fn check_not_behind(&self, snapshot: &Topology) -> Result<()> {
        if snapshot.version < self.topology.version
            || snapshot.fence_version < self.topology.fence_version
        {
            warn!(self.logger, "Refusing to restore an older topology snapshot";
                "snapshot_version" => snapshot.version,
                "snapshot_fence_version" => snapshot.fence_version,
                "version" => self.topology.version,
                "fence_version" => self.topology.fence_version
            );
            return Err(TopologyError::SnapshotBehind {
                snapshot: snapshot.version,
                current: self.topology.version,
            });
        }
        Ok(())
    }
}

impl StateMachine for TopologyStateMachine {
    type Command = TopologyCommand;
    type Event = TopologyEvent;
    type Error = TopologyError;

    fn apply(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>> {
        self.apply_command(command).map(|applied| applied.events)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.topology)?)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        let topology: Topology = serde_json::from_slice(snapshot)?;
        topology.validate()?;
        self.check_not_behind(&topology)?;
        self.topology = topology;
        Ok(())
    }
}

fn apply_to(t: &mut Topology, command: &TopologyCommand) -> Result<Vec<TopologyEvent>> {
    match command {
        TopologyCommand::RequestJoin {
            node,
            info,
            num_tokens,
            request_id,
        } => {
            if *num_tokens == 0 || *num_tokens > MAX_TOKENS_PER_NODE {
                return Err(TopologyError::InvalidTokenCount {
                    node: *node,
                    num_tokens: *num_tokens,
                });
            }
            request_new_node(
                t,
                *node,
                info,
                RequestParam::Join {
                    num_tokens: *num_tokens,
                },
                *request_id,
            )
        }

        TopologyCommand::RequestReplace {
            node,
            info,
            replaced_id,
            ignored_ids,
            request_id,
        } => {
            expect_normal(t, replaced_id)?;
            let already_replaced = t
                .req_param
                .values()
                .any(|p| p.replaced_node() == Some(*replaced_id));
            if already_replaced || t.requests.contains_key(replaced_id) {
                return Err(TopologyError::RequestPending(*replaced_id));
            }
            request_new_node(
                t,
                *node,
                info,
                RequestParam::Replace {
                    replaced_id: *replaced_id,
                    ignored_ids: ignored_ids.clone(),
                },
                *request_id,
            )
        }

        TopologyCommand::RequestLeave { node, request_id } => {
            request_normal_node(t, *node, TopologyRequest::Leave, None, *request_id)
        }

        TopologyCommand::RequestRemove {
            node,
            ignored_ids,
            request_id,
        } => request_normal_node(
            t,
            *node,
            TopologyRequest::Remove,
            Some(RequestParam::Remove {
                ignored_ids: ignored_ids.clone(),
            }),
            *request_id,
        ),

        TopologyCommand::RequestRebuild {
            node,
            source_dc,
            request_id,
        } => request_normal_node(
            t,
            *node,
            TopologyRequest::Rebuild,
            Some(RequestParam::Rebuild {
                source_dc: source_dc.clone(),
            }),
            *request_id,
        ),

        TopologyCommand::RequestGlobal { request } => {
            if t.global_request.is_some() {
                return Err(TopologyError::GlobalRequestPending);
            }
            t.global_request = Some(*request);
            Ok(vec![TopologyEvent::GlobalRequestQueued { request: *request }])
        }

        TopologyCommand::StartNodeOperation { node, session } => {
            start_node_operation(t, *node, *session)
        }

        TopologyCommand::AssignTokens { node, tokens } => assign_tokens(t, *node, tokens),

        TopologyCommand::AdvanceTransition { to } => advance_transition(t, *to),

        TopologyCommand::CompleteNodeOperation { node } => complete_node_operation(t, *node),

        TopologyCommand::AbortNodeOperation { node, reason } => {
            abort_node_operation(t, *node, reason)
        }

        TopologyCommand::StartGlobalRequest => start_global_request(t),

        TopologyCommand::StageCdcGeneration { data_uuid } => {
            expect_transition_state(t, TransitionState::CommitCdcGeneration)?;
            t.cdc.stage(*data_uuid)?;
            Ok(vec![TopologyEvent::CdcGenerationStaged {
                data_uuid: *data_uuid,
            }])
        }

        TopologyCommand::CommitCdcGeneration { generation } => {
            commit_cdc_generation(t, *generation)
        }

        TopologyCommand::PublishCdcGeneration => {
            let generation = t.cdc.publish()?;
            Ok(vec![TopologyEvent::CdcGenerationPublished { generation }])
        }

        TopologyCommand::SetCleanupStatus { node, status } => set_cleanup_status(t, *node, *status),

        TopologyCommand::UpdateSupportedFeatures { node, features } => {
            update_supported_features(t, *node, features)
        }

        TopologyCommand::EnableFeatures { features } => {
            let ready = t.calculate_not_yet_enabled_features();
            let not_ready: Vec<String> = features.difference(&ready).cloned().collect();
            if !not_ready.is_empty() {
                return Err(TopologyError::FeatureNotReady(not_ready));
            }
            t.enabled_features.extend(features.iter().cloned());
            Ok(vec![TopologyEvent::FeaturesEnabled {
                features: features.clone(),
            }])
        }

        TopologyCommand::SetTabletBalancing { enabled } => {
            t.tablet_balancing_enabled = *enabled;
            Ok(vec![TopologyEvent::TabletBalancingChanged { enabled: *enabled }])
        }
    }
}

fn expect_normal<'a>(t: &'a Topology, node: &NodeId) -> Result<&'a ReplicaState> {
    if let Some(rs) = t.normal_nodes.get(node) {
        return Ok(rs);
    }
    if t.left_nodes.contains(node) {
        return Err(TopologyError::NodeLeft(*node));
    }
    match t.find(node) {
        Some(rs) => Err(TopologyError::InvalidNodeState {
            node: *node,
            state: rs.state,
            expected: NodeState::Normal.to_string(),
        }),
        None => Err(TopologyError::UnknownNode(*node)),
    }
}

fn expect_transitioning<'a>(t: &'a Topology, node: &NodeId) -> Result<&'a ReplicaState> {
    if let Some(rs) = t.transition_nodes.get(node) {
        return Ok(rs);
    }
    if t.left_nodes.contains(node) {
        return Err(TopologyError::NodeLeft(*node));
    }
    match t.find(node) {
        Some(rs) => Err(TopologyError::InvalidNodeState {
            node: *node,
            state: rs.state,
            expected: "a transitioning state".to_string(),
        }),
        None => Err(TopologyError::UnknownNode(*node)),
    }
}

fn expect_transition_state(t: &Topology, expected: TransitionState) -> Result<()> {
    if t.transition_state != Some(expected) {
        return Err(TopologyError::WrongTransitionState {
            expected,
            actual: t.transition_state,
        });
    }
    Ok(())
}

/// Every enabled feature must be in `supported`
fn check_supports(t: &Topology, node: NodeId, supported: &BTreeSet<String>) -> Result<()> {
    let missing: Vec<String> = t.enabled_features.difference(supported).cloned().collect();
    if !missing.is_empty() {
        return Err(TopologyError::UnsupportedFeatures { node, missing });
    }
    Ok(())
}

/// Admit a join or replace from a node the topology has never seen
fn request_new_node(
    t: &mut Topology,
    node: NodeId,
    info: &NodeInfo,
    param: RequestParam,
    request_id: Uuid,
) -> Result<Vec<TopologyEvent>> {
    t.ensure_not_busy()?;
    if t.left_nodes.contains(&node) {
        return Err(TopologyError::NodeLeft(node));
    }
    if t.find(&node).is_some() {
        return Err(TopologyError::NodeExists(node));
    }
    check_supports(t, node, &info.supported_features)?;

    let request = param.request();
    t.new_nodes
        .insert(node, ReplicaState::new(info.clone(), request_id));
    t.requests.insert(node, request);
    t.req_param.insert(node, param);
    t.request_states
        .insert(request_id, TopologyRequestState::pending());

    Ok(vec![TopologyEvent::RequestQueued { node, request }])
}

/// Admit leave, remove or rebuild for a normal node
fn request_normal_node(
    t: &mut Topology,
    node: NodeId,
    request: TopologyRequest,
    param: Option<RequestParam>,
    request_id: Uuid,
) -> Result<Vec<TopologyEvent>> {
    t.ensure_not_busy()?;
    expect_normal(t, &node)?;
    let being_replaced = t
        .req_param
        .values()
        .any(|p| p.replaced_node() == Some(node));
    if t.requests.contains_key(&node) || being_replaced {
        return Err(TopologyError::RequestPending(node));
    }

    if let Some(rs) = t.normal_nodes.get_mut(&node) {
        rs.request_id = request_id;
    }
    t.requests.insert(node, request);
    if let Some(param) = param {
        t.req_param.insert(node, param);
    }
    t.request_states
        .insert(request_id, TopologyRequestState::pending());

    Ok(vec![TopologyEvent::RequestQueued { node, request }])
}

fn start_node_operation(
    t: &mut Topology,
    node: NodeId,
    session: SessionId,
) -> Result<Vec<TopologyEvent>> {
    t.ensure_not_busy()?;
    let next = t.next_request();
    let request = match next {
        Some((id, request)) if id == node => request,
        _ => {
            return Err(TopologyError::NotNextInPriority {
                requested: node,
                next: next.map(|(id, _)| id),
            })
        }
    };

    let source = match request {
        TopologyRequest::Join | TopologyRequest::Replace => &mut t.new_nodes,
        TopologyRequest::Remove | TopologyRequest::Leave | TopologyRequest::Rebuild => {
            &mut t.normal_nodes
        }
    };
    let mut rs = source
        .remove(&node)
        .ok_or(TopologyError::UnknownNode(node))?;
    rs.state = request.operation_state();
    let state = rs.state;

    t.requests.remove(&node);
    t.transition_nodes.insert(node, rs);
    t.session = session;

    let mut events = vec![TopologyEvent::OperationStarted {
        node,
        request,
        state,
    }];
    if let Some(to) = request.initial_transition_state() {
        t.transition_state = Some(to);
        events.push(TopologyEvent::TransitionChanged {
            from: None,
            to: Some(to),
        });
    }
    Ok(events)
}

/// The node owning `token` among ring holders other than `except`
fn token_owner(t: &Topology, token: &Token, except: &NodeId) -> Option<NodeId> {
    t.normal_nodes
        .iter()
        .chain(&t.transition_nodes)
        .filter(|(id, _)| *id != except)
        .find(|(_, rs)| {
            rs.ring
                .as_ref()
                .is_some_and(|ring| ring.tokens.contains(token))
        })
        .map(|(id, _)| *id)
}

fn assign_tokens(
    t: &mut Topology,
    node: NodeId,
    tokens: &BTreeSet<Token>,
) -> Result<Vec<TopologyEvent>> {
    let rs = expect_transitioning(t, &node)?;
    if !matches!(rs.state, NodeState::Bootstrapping | NodeState::Replacing) || rs.ring.is_some() {
        return Err(TopologyError::InvalidNodeState {
            node,
            state: rs.state,
            expected: "bootstrapping or replacing without tokens".to_string(),
        });
    }
    expect_transition_state(t, TransitionState::JoinGroup0)?;

    match t.req_param.get(&node) {
        Some(RequestParam::Join { num_tokens }) => {
            let expected = *num_tokens as usize;
            if tokens.len() != expected {
                return Err(TopologyError::TokenCountMismatch {
                    node,
                    expected,
                    actual: tokens.len(),
                });
            }
            for token in tokens {
                if let Some(owner) = token_owner(t, token, &node) {
                    return Err(TopologyError::TokenConflict {
                        node,
                        owner,
                        token: token.0,
                    });
                }
            }
        }
        Some(RequestParam::Replace { replaced_id, .. }) => {
            let replaced_ring = t
                .normal_nodes
                .get(replaced_id)
                .and_then(|rs| rs.ring.as_ref())
                .ok_or(TopologyError::UnknownNode(*replaced_id))?;
            if &replaced_ring.tokens != tokens {
                return Err(TopologyError::TokenMismatch {
                    node,
                    replaced: *replaced_id,
                });
            }
        }
        _ => {
            return Err(TopologyError::InvariantViolation(format!(
                "node {} is {} without join or replace parameters",
                node, rs.state
            )))
        }
    }

    if let Some(rs) = t.transition_nodes.get_mut(&node) {
        rs.ring = Some(RingSlice::new(tokens.iter().copied()));
    }
    Ok(vec![TopologyEvent::TokensAssigned {
        node,
        count: tokens.len(),
    }])
}

fn advance_transition(
    t: &mut Topology,
    to: Option<TransitionState>,
) -> Result<Vec<TopologyEvent>> {
    let from = t.transition_state;
    if !TransitionState::can_advance(from, to) {
        return Err(TopologyError::InvalidTransition { from, to });
    }
    // Tablet-only and CDC phases cannot start under a running node operation
    if from.is_none() && !t.transition_nodes.is_empty() {
        return Err(TopologyError::Busy {
            transition_state: from,
            transitioning: t.transition_nodes.len(),
        });
    }
    if to.is_none() && !t.transition_nodes.is_empty() {
        return Err(TopologyError::InvalidTransition { from, to });
    }
    if to.is_some_and(|phase| phase.is_node_phase()) && t.transition_nodes.is_empty() {
        return Err(TopologyError::InvalidTransition { from, to });
    }
    if from == Some(TransitionState::JoinGroup0) {
        if let Some((id, rs)) = t.transition_nodes.iter().find(|(_, rs)| rs.ring.is_none()) {
            return Err(TopologyError::InvalidNodeState {
                node: *id,
                state: rs.state,
                expected: "tokens assigned".to_string(),
            });
        }
    }

    t.transition_state = to;
    let mut events = vec![TopologyEvent::TransitionChanged { from, to }];
    if to == Some(TransitionState::WriteBothReadNew) {
        t.fence_version = t.version;
        events.push(TopologyEvent::Fenced {
            fence_version: t.fence_version,
        });
    }
    Ok(events)
}

/// Clear the phase and the session once no node is transitioning
fn finish_if_idle(t: &mut Topology, events: &mut Vec<TopologyEvent>) {
    if !t.transition_nodes.is_empty() {
        return;
    }
    if let Some(from) = t.transition_state.take() {
        events.push(TopologyEvent::TransitionChanged {
            from: Some(from),
            to: None,
        });
    }
    t.session = SessionId::nil();
}

fn fence(t: &mut Topology, events: &mut Vec<TopologyEvent>) {
    t.fence_version = t.version;
    events.push(TopologyEvent::Fenced {
        fence_version: t.fence_version,
    });
}

/// Mark the request behind `request_id` finished, keeping any recorded error
fn finish_request(t: &mut Topology, request_id: Uuid, error: Option<&str>) {
    let state = t.request_states.entry(request_id).or_default();
    *state = match error {
        Some(error) => TopologyRequestState::failed(error),
        None if state.error.is_empty() => TopologyRequestState::succeeded(),
        None => TopologyRequestState::failed(std::mem::take(&mut state.error)),
    };
}

fn complete_node_operation(t: &mut Topology, node: NodeId) -> Result<Vec<TopologyEvent>> {
    let rs = expect_transitioning(t, &node)?;
    let state = rs.state;
    let ts = t.transition_state;

    let authorized = match state {
        NodeState::Bootstrapping | NodeState::Replacing => {
            ts == Some(TransitionState::WriteBothReadNew)
        }
        NodeState::Decommissioning => ts == Some(TransitionState::LeftTokenRing),
        NodeState::Removing => matches!(
            ts,
            Some(TransitionState::WriteBothReadNew) | Some(TransitionState::LeftTokenRing)
        ),
        NodeState::Rebuilding | NodeState::RollbackToNormal => ts.is_none(),
        NodeState::None | NodeState::Normal | NodeState::Left => false,
    };
    if !authorized {
        return Err(TopologyError::InvalidTransition { from: ts, to: None });
    }
    if matches!(state, NodeState::Bootstrapping | NodeState::Replacing) {
        if rs.ring.is_none() {
            return Err(TopologyError::InvalidNodeState {
                node,
                state,
                expected: "tokens assigned".to_string(),
            });
        }
        check_supports(t, node, &rs.supported_features)?;
    }

    let mut rs = t
        .transition_nodes
        .remove(&node)
        .ok_or(TopologyError::UnknownNode(node))?;
    let param = t.req_param.remove(&node);
    let mut events = Vec::new();

    match state {
        NodeState::Bootstrapping | NodeState::Replacing => {
            if let Some(RequestParam::Replace { replaced_id, .. }) = &param {
                if t.normal_nodes.remove(replaced_id).is_some() {
                    t.left_nodes.insert(*replaced_id);
                    events.push(TopologyEvent::NodeLeft { node: *replaced_id });
                }
            } else {
                // Existing owners lost ranges to the new node
                for (id, other) in t.normal_nodes.iter_mut() {
                    if other.cleanup == CleanupStatus::Clean {
                        other.cleanup = CleanupStatus::Needed;
                        events.push(TopologyEvent::CleanupStatusChanged {
                            node: *id,
                            status: CleanupStatus::Needed,
                        });
                    }
                }
            }
            rs.state = NodeState::Normal;
            finish_request(t, rs.request_id, None);
            t.normal_nodes.insert(node, rs);
            events.push(TopologyEvent::NodeBecameNormal { node });
            fence(t, &mut events);
        }
        NodeState::Decommissioning | NodeState::Removing => {
            finish_request(t, rs.request_id, None);
            t.left_nodes.insert(node);
            events.push(TopologyEvent::NodeLeft { node });
            fence(t, &mut events);
        }
        _ => {
            rs.state = NodeState::Normal;
            finish_request(t, rs.request_id, None);
            t.normal_nodes.insert(node, rs);
            events.push(TopologyEvent::NodeBecameNormal { node });
        }
    }

    finish_if_idle(t, &mut events);
    Ok(events)
}

fn abort_node_operation(
    t: &mut Topology,
    node: NodeId,
    reason: &str,
) -> Result<Vec<TopologyEvent>> {
    let state = expect_transitioning(t, &node)?.state;
    let from = t.transition_state;
    let mut events = vec![TopologyEvent::OperationAborted {
        node,
        reason: reason.to_string(),
    }];

    match state {
        NodeState::Decommissioning | NodeState::Removing => {
            // The node keeps its ring and returns to normal once rollback completes
            let mut request_id = None;
            if let Some(rs) = t.transition_nodes.get_mut(&node) {
                rs.state = NodeState::RollbackToNormal;
                request_id = Some(rs.request_id);
            }
            if let Some(id) = request_id {
                t.request_states.entry(id).or_default().error = reason.to_string();
            }
            t.transition_state = None;
            if from.is_some() {
                events.push(TopologyEvent::TransitionChanged { from, to: None });
            }
        }
        NodeState::Bootstrapping | NodeState::Replacing => {
            if let Some(rs) = t.transition_nodes.remove(&node) {
                finish_request(t, rs.request_id, Some(reason));
            }
            t.req_param.remove(&node);
            t.left_nodes.insert(node);
            events.push(TopologyEvent::NodeLeft { node });
        }
        NodeState::Rebuilding => {
            if let Some(mut rs) = t.transition_nodes.remove(&node) {
                finish_request(t, rs.request_id, Some(reason));
                rs.state = NodeState::Normal;
                t.normal_nodes.insert(node, rs);
            }
            t.req_param.remove(&node);
            events.push(TopologyEvent::NodeBecameNormal { node });
        }
        NodeState::RollbackToNormal | NodeState::None | NodeState::Normal | NodeState::Left => {
            return Err(TopologyError::InvalidNodeState {
                node,
                state,
                expected: "an abortable operation".to_string(),
            })
        }
    }

    fence(t, &mut events);
    finish_if_idle(t, &mut events);
    Ok(events)
}

fn start_global_request(t: &mut Topology) -> Result<Vec<TopologyEvent>> {
    t.ensure_not_busy()?;
    let request = t.global_request.ok_or(TopologyError::NoGlobalRequest)?;
    let mut events = vec![TopologyEvent::GlobalRequestStarted { request }];

    match request {
        GlobalTopologyRequest::NewCdcGeneration => {
            // Cleared when the generation commits
            t.transition_state = Some(TransitionState::CommitCdcGeneration);
            events.push(TopologyEvent::TransitionChanged {
                from: None,
                to: t.transition_state,
            });
        }
        GlobalTopologyRequest::Cleanup => {
            for (id, rs) in t.normal_nodes.iter_mut() {
                if rs.cleanup == CleanupStatus::Needed {
                    rs.cleanup = CleanupStatus::Running;
                    events.push(TopologyEvent::CleanupStatusChanged {
                        node: *id,
                        status: CleanupStatus::Running,
                    });
                }
            }
            t.global_request = None;
        }
    }
    Ok(events)
}

fn commit_cdc_generation(
    t: &mut Topology,
    generation: CdcGenerationId,
) -> Result<Vec<TopologyEvent>> {
    expect_transition_state(t, TransitionState::CommitCdcGeneration)?;
    t.cdc.commit(generation)?;

    let to = if t.transition_nodes.is_empty() {
        None
    } else {
        Some(TransitionState::WriteBothReadOld)
    };
    t.transition_state = to;
    if t.global_request == Some(GlobalTopologyRequest::NewCdcGeneration) {
        t.global_request = None;
    }

    Ok(vec![
        TopologyEvent::CdcGenerationCommitted { generation },
        TopologyEvent::TransitionChanged {
            from: Some(TransitionState::CommitCdcGeneration),
            to,
        },
    ])
}

fn set_cleanup_status(
    t: &mut Topology,
    node: NodeId,
    status: CleanupStatus,
) -> Result<Vec<TopologyEvent>> {
    let current = expect_normal(t, &node)?.cleanup;
    let legal = matches!(
        (current, status),
        (CleanupStatus::Clean, CleanupStatus::Needed)
            | (CleanupStatus::Needed, CleanupStatus::Running)
            | (CleanupStatus::Running, CleanupStatus::Clean)
    );
    if !legal {
        return Err(TopologyError::InvalidCleanupTransition {
            node,
            from: current.to_string(),
            to: status.to_string(),
        });
    }
    if let Some(rs) = t.normal_nodes.get_mut(&node) {
        rs.cleanup = status;
    }
    Ok(vec![TopologyEvent::CleanupStatusChanged { node, status }])
}

fn update_supported_features(
    t: &mut Topology,
    node: NodeId,
    features: &BTreeSet<String>,
) -> Result<Vec<TopologyEvent>> {
    if t.find(&node).is_none() {
        return Err(if t.left_nodes.contains(&node) {
            TopologyError::NodeLeft(node)
        } else {
            TopologyError::UnknownNode(node)
        });
    }
    let gates_features = t.normal_nodes.contains_key(&node)
        || t
            .transition_nodes
            .get(&node)
            .is_some_and(|rs| rs.state.retains_ring());
    if gates_features {
        check_supports(t, node, features)?;
    }

    let rs = t
        .normal_nodes
        .get_mut(&node)
        .or_else(|| t.transition_nodes.get_mut(&node))
        .or_else(|| t.new_nodes.get_mut(&node));
    if let Some(rs) = rs {
        rs.supported_features = features.clone();
    }
    Ok(vec![TopologyEvent::SupportedFeaturesChanged { node }])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn info(features: &[&str]) -> NodeInfo {
        NodeInfo {
            datacenter: "dc1".to_string(),
            rack: "rack1".to_string(),
            release_version: "2025.1".to_string(),
            shard_count: 4,
            ignore_msb: 12,
            supported_features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn tokens(values: &[i64]) -> BTreeSet<Token> {
        values.iter().copied().map(Token).collect()
    }

    fn apply(sm: &mut TopologyStateMachine, command: TopologyCommand) -> AppliedCommand {
        sm.apply_command(&command)
            .unwrap_or_else(|e| panic!("{} failed: {}", command.name(), e))
    }

    /// Drive a join from request to normal without a CDC generation
    fn join(sm: &mut TopologyStateMachine, node: NodeId, ring: &[i64]) {
        apply(
            sm,
            TopologyCommand::RequestJoin {
                node,
                info: info(&["f1", "f2"]),
                num_tokens: ring.len() as u32,
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            sm,
            TopologyCommand::StartNodeOperation {
                node,
                session: SessionId::new(),
            },
        );
        apply(
            sm,
            TopologyCommand::AssignTokens {
                node,
                tokens: tokens(ring),
            },
        );
        apply(
            sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadOld),
            },
        );
        apply(
            sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadNew),
            },
        );
        apply(sm, TopologyCommand::CompleteNodeOperation { node });
    }

    #[test]
    fn test_join_scenario() {
        let mut sm = TopologyStateMachine::new(logger());
        let first = NodeId::new();
        join(&mut sm, first, &[100, 200]);

        let node = NodeId::new();
        let request_id = Uuid::new_v4();
        let before = sm.version();
        apply(
            &mut sm,
            TopologyCommand::RequestJoin {
                node,
                info: info(&["f1"]),
                num_tokens: 2,
                request_id,
            },
        );
        assert_eq!(sm.version(), before + 1);
        assert!(sm.topology().new_nodes.contains_key(&node));
        assert_eq!(sm.topology().requests[&node], TopologyRequest::Join);

        let applied = apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node,
                session: SessionId::new(),
            },
        );
        assert_eq!(
            sm.topology().transition_nodes[&node].state,
            NodeState::Bootstrapping
        );
        assert_eq!(
            sm.topology().transition_state,
            Some(TransitionState::JoinGroup0)
        );
        assert!(applied.events.contains(&TopologyEvent::TransitionChanged {
            from: None,
            to: Some(TransitionState::JoinGroup0)
        }));

        apply(
            &mut sm,
            TopologyCommand::AssignTokens {
                node,
                tokens: tokens(&[150, 250]),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadOld),
            },
        );
        let applied = apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadNew),
            },
        );
        assert_eq!(sm.topology().fence_version, applied.version);

        let applied = apply(&mut sm, TopologyCommand::CompleteNodeOperation { node });
        let topology = sm.topology();
        assert_eq!(topology.normal_nodes[&node].state, NodeState::Normal);
        assert_eq!(topology.normal_nodes[&node].token_count(), 2);
        assert!(topology.transition_state.is_none());
        assert!(!topology.is_busy());
        assert!(topology.session.is_nil());
        assert_eq!(topology.normal_nodes[&first].cleanup, CleanupStatus::Needed);
        assert_eq!(topology.normal_nodes[&node].cleanup, CleanupStatus::Clean);
        assert!(topology.request_states[&request_id].done);
        assert!(topology.req_param.get(&node).is_none());
        assert_eq!(topology.fence_version, applied.version);
        assert!(!applied.mutations.topology_requests_mutations.is_empty());
    }

    #[test]
    fn test_busy_rejection_leaves_topology_unchanged() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        join(&mut sm, a, &[1]);

        let b = NodeId::new();
        apply(
            &mut sm,
            TopologyCommand::RequestJoin {
                node: b,
                info: info(&[]),
                num_tokens: 1,
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node: b,
                session: SessionId::new(),
            },
        );
        assert!(sm.topology().is_busy());

        let before = sm.topology().clone();
        let err = sm
            .apply_command(&TopologyCommand::RequestLeave {
                node: a,
                request_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert!(matches!(err, TopologyError::Busy { .. }));
        assert_eq!(sm.topology(), &before);
    }

    #[test]
    fn test_requests_start_in_priority_order() {
        let mut sm = TopologyStateMachine::new(logger());
        let normal = NodeId::new();
        join(&mut sm, normal, &[1, 2]);

        let joiner = NodeId::new();
        apply(
            &mut sm,
            TopologyCommand::RequestLeave {
                node: normal,
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::RequestJoin {
                node: joiner,
                info: info(&[]),
                num_tokens: 1,
                request_id: Uuid::new_v4(),
            },
        );

        let err = sm
            .apply_command(&TopologyCommand::StartNodeOperation {
                node: normal,
                session: SessionId::new(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::NotNextInPriority {
                requested: normal,
                next: Some(joiner)
            }
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node: joiner,
                session: SessionId::new(),
            },
        );
    }

    #[test]
    fn test_join_rejects_conflicting_tokens() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        join(&mut sm, a, &[10]);

        let b = NodeId::new();
        apply(
            &mut sm,
            TopologyCommand::RequestJoin {
                node: b,
                info: info(&[]),
                num_tokens: 1,
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node: b,
                session: SessionId::new(),
            },
        );

        assert_eq!(
            sm.apply_command(&TopologyCommand::AssignTokens {
                node: b,
                tokens: tokens(&[10])
            })
            .unwrap_err(),
            TopologyError::TokenConflict {
                node: b,
                owner: a,
                token: 10
            }
        );
        assert!(matches!(
            sm.apply_command(&TopologyCommand::AssignTokens {
                node: b,
                tokens: tokens(&[11, 12])
            }),
            Err(TopologyError::TokenCountMismatch { .. })
        ));
        // Cannot leave join group0 before the ring is assigned
        assert!(matches!(
            sm.apply_command(&TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadOld)
            }),
            Err(TopologyError::InvalidNodeState { .. })
        ));
    }

    #[test]
    fn test_replace_takes_over_tokens() {
        let mut sm = TopologyStateMachine::new(logger());
        let dead = NodeId::new();
        let alive = NodeId::new();
        join(&mut sm, dead, &[1, 2]);
        join(&mut sm, alive, &[3]);

        let node = NodeId::new();
        apply(
            &mut sm,
            TopologyCommand::RequestReplace {
                node,
                info: info(&["f1", "f2"]),
                replaced_id: dead,
                ignored_ids: BTreeSet::new(),
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node,
                session: SessionId::new(),
            },
        );
        assert_eq!(
            sm.topology().get_excluded_nodes(),
            BTreeSet::from([dead])
        );
        assert!(matches!(
            sm.apply_command(&TopologyCommand::AssignTokens {
                node,
                tokens: tokens(&[1, 5])
            }),
            Err(TopologyError::TokenMismatch { .. })
        ));
        apply(
            &mut sm,
            TopologyCommand::AssignTokens {
                node,
                tokens: tokens(&[1, 2]),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadOld),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadNew),
            },
        );
        apply(&mut sm, TopologyCommand::CompleteNodeOperation { node });

        let topology = sm.topology();
        assert!(topology.left_nodes.contains(&dead));
        assert_eq!(topology.normal_nodes[&node].token_count(), 2);
        assert_eq!(topology.normal_nodes[&alive].cleanup, CleanupStatus::Clean);
    }

    #[test]
    fn test_decommission_and_rollback() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        let b = NodeId::new();
        join(&mut sm, a, &[1]);
        join(&mut sm, b, &[2]);

        let request_id = Uuid::new_v4();
        apply(
            &mut sm,
            TopologyCommand::RequestLeave {
                node: b,
                request_id,
            },
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node: b,
                session: SessionId::new(),
            },
        );
        assert_eq!(
            sm.topology().transition_state,
            Some(TransitionState::WriteBothReadOld)
        );

        let applied = apply(
            &mut sm,
            TopologyCommand::AbortNodeOperation {
                node: b,
                reason: "streaming failed".to_string(),
            },
        );
        assert_eq!(sm.topology().fence_version, applied.version);
        assert_eq!(
            sm.topology().transition_nodes[&b].state,
            NodeState::RollbackToNormal
        );
        assert!(sm.topology().transition_state.is_none());
        assert!(sm.topology().is_busy());

        apply(&mut sm, TopologyCommand::CompleteNodeOperation { node: b });
        let topology = sm.topology();
        assert_eq!(topology.normal_nodes[&b].state, NodeState::Normal);
        assert_eq!(topology.request_states[&request_id].error, "streaming failed");
        assert!(topology.request_states[&request_id].done);
        assert!(!topology.is_busy());
    }

    #[test]
    fn test_decommission_completes_after_left_token_ring() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        let b = NodeId::new();
        join(&mut sm, a, &[1]);
        join(&mut sm, b, &[2]);

        apply(
            &mut sm,
            TopologyCommand::RequestLeave {
                node: b,
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node: b,
                session: SessionId::new(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadNew),
            },
        );
        assert!(sm
            .apply_command(&TopologyCommand::CompleteNodeOperation { node: b })
            .is_err());
        apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::LeftTokenRing),
            },
        );
        apply(&mut sm, TopologyCommand::CompleteNodeOperation { node: b });

        assert!(sm.topology().left_nodes.contains(&b));
        // Ids of departed nodes cannot come back
        assert_eq!(
            sm.apply_command(&TopologyCommand::RequestJoin {
                node: b,
                info: info(&[]),
                num_tokens: 1,
                request_id: Uuid::new_v4(),
            })
            .unwrap_err(),
            TopologyError::NodeLeft(b)
        );
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut sm = TopologyStateMachine::new(logger());
        let err = sm
            .apply_command(&TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::WriteBothReadNew),
            })
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::InvalidTransition {
                from: None,
                to: Some(TransitionState::WriteBothReadNew)
            }
        );
        assert_eq!(sm.version(), Topology::INITIAL_VERSION);
    }

    #[test]
    fn test_new_cdc_generation_global_request() {
        let mut sm = TopologyStateMachine::new(logger());
        apply(
            &mut sm,
            TopologyCommand::RequestGlobal {
                request: GlobalTopologyRequest::NewCdcGeneration,
            },
        );
        assert_eq!(
            sm.apply_command(&TopologyCommand::RequestGlobal {
                request: GlobalTopologyRequest::Cleanup
            })
            .unwrap_err(),
            TopologyError::GlobalRequestPending
        );

        apply(&mut sm, TopologyCommand::StartGlobalRequest);
        assert_eq!(
            sm.topology().transition_state,
            Some(TransitionState::CommitCdcGeneration)
        );

        let generation = CdcGenerationId {
            ts: 1_000,
            id: Uuid::new_v4(),
        };
        apply(
            &mut sm,
            TopologyCommand::StageCdcGeneration {
                data_uuid: generation.id,
            },
        );
        let applied = apply(&mut sm, TopologyCommand::CommitCdcGeneration { generation });
        assert_eq!(applied.mutations.cdc_generation_mutations.len(), 1);

        let topology = sm.topology();
        assert!(topology.transition_state.is_none());
        assert!(topology.global_request.is_none());
        assert_eq!(topology.cdc.unpublished_cdc_generations, vec![generation]);

        apply(&mut sm, TopologyCommand::PublishCdcGeneration);
        assert_eq!(
            sm.topology().cdc.current_cdc_generation_id,
            Some(generation)
        );
        assert!(sm.topology().cdc.unpublished_cdc_generations.is_empty());
    }

    #[test]
    fn test_cleanup_cycle() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        join(&mut sm, a, &[1]);
        join(&mut sm, NodeId::new(), &[2]);
        assert_eq!(sm.topology().normal_nodes[&a].cleanup, CleanupStatus::Needed);

        apply(
            &mut sm,
            TopologyCommand::RequestGlobal {
                request: GlobalTopologyRequest::Cleanup,
            },
        );
        apply(&mut sm, TopologyCommand::StartGlobalRequest);
        assert_eq!(sm.topology().normal_nodes[&a].cleanup, CleanupStatus::Running);
        assert!(sm.topology().global_request.is_none());

        assert!(matches!(
            sm.apply_command(&TopologyCommand::SetCleanupStatus {
                node: a,
                status: CleanupStatus::Needed
            }),
            Err(TopologyError::InvalidCleanupTransition { .. })
        ));
        apply(
            &mut sm,
            TopologyCommand::SetCleanupStatus {
                node: a,
                status: CleanupStatus::Clean,
            },
        );
        assert_eq!(sm.topology().normal_nodes[&a].cleanup, CleanupStatus::Clean);
    }

    #[test]
    fn test_feature_gate() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        join(&mut sm, a, &[1]);

        // Nothing can be enabled that a normal node does not support
        assert_eq!(
            sm.apply_command(&TopologyCommand::EnableFeatures {
                features: BTreeSet::from(["f3".to_string()])
            })
            .unwrap_err(),
            TopologyError::FeatureNotReady(vec!["f3".to_string()])
        );
        apply(
            &mut sm,
            TopologyCommand::EnableFeatures {
                features: BTreeSet::from(["f1".to_string()]),
            },
        );
        assert!(sm.topology().enabled_features.contains("f1"));

        assert!(matches!(
            sm.apply_command(&TopologyCommand::UpdateSupportedFeatures {
                node: a,
                features: BTreeSet::from(["f2".to_string()]),
            }),
            Err(TopologyError::UnsupportedFeatures { .. })
        ));
        assert!(matches!(
            sm.apply_command(&TopologyCommand::RequestJoin {
                node: NodeId::new(),
                info: info(&["f2"]),
                num_tokens: 1,
                request_id: Uuid::new_v4(),
            }),
            Err(TopologyError::UnsupportedFeatures { .. })
        ));
    }

    #[test]
    fn test_feature_gate_counts_rebuilding_node() {
        let mut sm = TopologyStateMachine::new(logger());
        let a = NodeId::new();
        let b = NodeId::new();
        join(&mut sm, a, &[1]);
        join(&mut sm, b, &[2]);
        apply(
            &mut sm,
            TopologyCommand::UpdateSupportedFeatures {
                node: b,
                features: BTreeSet::from(["f1".to_string()]),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::RequestRebuild {
                node: b,
                source_dc: "dc1".to_string(),
                request_id: Uuid::new_v4(),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::StartNodeOperation {
                node: b,
                session: SessionId::new(),
            },
        );

        // b returns to normal, so it still has a say
        assert_eq!(
            sm.apply_command(&TopologyCommand::EnableFeatures {
                features: BTreeSet::from(["f2".to_string()])
            })
            .unwrap_err(),
            TopologyError::FeatureNotReady(vec!["f2".to_string()])
        );
        apply(
            &mut sm,
            TopologyCommand::EnableFeatures {
                features: BTreeSet::from(["f1".to_string()]),
            },
        );
        assert!(matches!(
            sm.apply_command(&TopologyCommand::UpdateSupportedFeatures {
                node: b,
                features: BTreeSet::from(["f2".to_string()]),
            }),
            Err(TopologyError::UnsupportedFeatures { .. })
        ));

        apply(&mut sm, TopologyCommand::CompleteNodeOperation { node: b });
        apply(
            &mut sm,
            TopologyCommand::UpdateSupportedFeatures {
                node: b,
                features: BTreeSet::from(["f1".to_string(), "f2".to_string()]),
            },
        );
        apply(
            &mut sm,
            TopologyCommand::EnableFeatures {
                features: BTreeSet::from(["f2".to_string()]),
            },
        );
        assert_eq!(sm.topology().enabled_features.len(), 2);
        sm.topology().validate().unwrap();
    }

    #[test]
    fn test_node_phase_needs_an_operation() {
        let mut sm = TopologyStateMachine::new(logger());
        join(&mut sm, NodeId::new(), &[1]);
        let version = sm.version();

        for to in [
            TransitionState::JoinGroup0,
            TransitionState::WriteBothReadOld,
            TransitionState::TabletDraining,
        ] {
            assert_eq!(
                sm.apply_command(&TopologyCommand::AdvanceTransition { to: Some(to) })
                    .unwrap_err(),
                TopologyError::InvalidTransition {
                    from: None,
                    to: Some(to)
                }
            );
        }
        assert_eq!(sm.version(), version);
        assert!(!sm.topology().is_busy());

        // Tablet phases run without a node operation
        apply(
            &mut sm,
            TopologyCommand::AdvanceTransition {
                to: Some(TransitionState::TabletMigration),
            },
        );
        apply(&mut sm, TopologyCommand::AdvanceTransition { to: None });
        assert!(!sm.topology().is_busy());
    }

    #[test]
    fn test_join_token_count_bounds() {
        let mut sm = TopologyStateMachine::new(logger());
        let node = NodeId::new();
        for num_tokens in [0, MAX_TOKENS_PER_NODE + 1] {
            assert_eq!(
                sm.apply_command(&TopologyCommand::RequestJoin {
                    node,
                    info: info(&[]),
                    num_tokens,
                    request_id: Uuid::new_v4(),
                })
                .unwrap_err(),
                TopologyError::InvalidTokenCount { node, num_tokens }
            );
        }
        assert_eq!(sm.version(), Topology::INITIAL_VERSION);
        assert!(sm.topology().is_empty());

        apply(
            &mut sm,
            TopologyCommand::RequestJoin {
                node,
                info: info(&[]),
                num_tokens: MAX_TOKENS_PER_NODE,
                request_id: Uuid::new_v4(),
            },
        );
    }

    #[test]
    fn test_replaced_node_takes_no_other_request() {
        let mut sm = TopologyStateMachine::new(logger());
        let dead = NodeId::new();
        let leaving = NodeId::new();
        join(&mut sm, dead, &[1]);
        join(&mut sm, leaving, &[2]);

        apply(
            &mut sm,
            TopologyCommand::RequestReplace {
                node: NodeId::new(),
                info: info(&["f1", "f2"]),
                replaced_id: dead,
                ignored_ids: BTreeSet::new(),
                request_id: Uuid::new_v4(),
            },
        );
        assert_eq!(
            sm.apply_command(&TopologyCommand::RequestLeave {
                node: dead,
                request_id: Uuid::new_v4(),
            })
            .unwrap_err(),
            TopologyError::RequestPending(dead)
        );

        apply(
            &mut sm,
            TopologyCommand::RequestLeave {
                node: leaving,
                request_id: Uuid::new_v4(),
            },
        );
        assert_eq!(
            sm.apply_command(&TopologyCommand::RequestReplace {
                node: NodeId::new(),
                info: info(&["f1", "f2"]),
                replaced_id: leaving,
                ignored_ids: BTreeSet::new(),
                request_id: Uuid::new_v4(),
            })
            .unwrap_err(),
            TopologyError::RequestPending(leaving)
        );
    }

    #[test]
    fn test_restore_refuses_older_snapshot() {
        let mut sm = TopologyStateMachine::new(logger());
        join(&mut sm, NodeId::new(), &[1]);
        let old_bytes = sm.snapshot().unwrap();
        let old_rows = sm.snapshot_mutations().unwrap();
        let old_version = sm.version();
        join(&mut sm, NodeId::new(), &[2]);
        let current = sm.topology().clone();

        let err = sm.restore(&old_bytes).unwrap_err();
        assert!(matches!(err, TopologyError::SnapshotBehind { .. }), "got {:?}", err);
        let err = sm.restore_mutations(&old_rows).unwrap_err();
        assert_eq!(
            err,
            TopologyError::SnapshotBehind {
                snapshot: old_version,
                current: current.version,
            }
        );
        assert_eq!(sm.topology(), &current);

        // The same version is accepted
        let same = sm.snapshot_mutations().unwrap();
        sm.restore_mutations(&same).unwrap();
        assert_eq!(sm.topology(), &current);
    }

    #[test]
    fn test_state_machine_snapshot_restore() {
        let mut sm = TopologyStateMachine::new(logger());
        join(&mut sm, NodeId::new(), &[1, 2, 3]);

        let bytes = sm.snapshot().unwrap();
        let mut restored = TopologyStateMachine::new(logger());
        restored.restore(&bytes).unwrap();
        assert_eq!(restored.topology(), sm.topology());

        let rows = sm.snapshot_mutations().unwrap();
        let mut reloaded = TopologyStateMachine::new(logger());
        reloaded.restore_mutations(&rows).unwrap();
        assert_eq!(reloaded.topology(), sm.topology());
    }
}
