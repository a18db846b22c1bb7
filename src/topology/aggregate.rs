//! The topology aggregate
//!
//! One instance per node, mutated only by applying committed commands (see
//! `state_machine`). Maps are ordered so every node iterates them identically.

use super::cdc::CdcGenerationLedger;
use super::features::TopologyFeatures;
use super::fencing::{FencingToken, Version};
use super::replica::ReplicaState;
use super::request::{RequestParam, TopologyRequestState};
use super::types::{
    GlobalTopologyRequest, NodeId, NodeState, SessionId, TopologyRequest, TransitionState,
};
use crate::errors::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Global phase; engaged iff an operation is mid-flight cluster-wide
    pub transition_state: Option<TransitionState>,

    /// Bumped by every committed command
    pub version: Version,

    /// Bumped when in-flight fenced operations must be invalidated
    pub fence_version: Version,

    /// Nodes that are normal members of the ring
    pub normal_nodes: BTreeMap<NodeId, ReplicaState>,

    /// Nodes waiting to be picked up by the coordinator
    pub new_nodes: BTreeMap<NodeId, ReplicaState>,

    /// Nodes undergoing a membership operation. Currently at most one, but
    /// nothing here relies on that.
    pub transition_nodes: BTreeMap<NodeId, ReplicaState>,

    /// Departed nodes; kept so their ids are never reused
    pub left_nodes: BTreeSet<NodeId>,

    /// Queued node requests that have not started yet
    pub requests: BTreeMap<NodeId, TopologyRequest>,

    /// Request parameters, valid until the node becomes normal again
    pub req_param: BTreeMap<NodeId, RequestParam>,

    pub global_request: Option<GlobalTopologyRequest>,

    pub cdc: CdcGenerationLedger,

    /// Features the cluster considers enabled
    pub enabled_features: BTreeSet<String>,

    /// Guards long-running operations (streaming) started by the current operation
    pub session: SessionId,

    /// When false the tablet load balancer does not rebalance
    pub tablet_balancing_enabled: bool,

    /// Completion state of every request ever submitted, by request id
    pub request_states: BTreeMap<Uuid, TopologyRequestState>,
}

impl Topology {
    pub const INITIAL_VERSION: Version = 1;

    pub fn new() -> Self {
        Self {
            transition_state: None,
            version: Self::INITIAL_VERSION,
            fence_version: Self::INITIAL_VERSION,
            normal_nodes: BTreeMap::new(),
            new_nodes: BTreeMap::new(),
            transition_nodes: BTreeMap::new(),
            left_nodes: BTreeSet::new(),
            requests: BTreeMap::new(),
            req_param: BTreeMap::new(),
            global_request: None,
            cdc: CdcGenerationLedger::default(),
            enabled_features: BTreeSet::new(),
            session: SessionId::nil(),
            tablet_balancing_enabled: true,
            request_states: BTreeMap::new(),
        }
    }

    /// Find a node in any state except `left`
    pub fn find(&self, id: &NodeId) -> Option<&ReplicaState> {
        self.normal_nodes
            .get(id)
            .or_else(|| self.transition_nodes.get(id))
            .or_else(|| self.new_nodes.get(id))
    }

    /// True if the node exists in any state, `left` included
    pub fn contains(&self, id: &NodeId) -> bool {
        self.find(id).is_some() || self.left_nodes.contains(id)
    }

    /// Number of nodes that have not left
    pub fn size(&self) -> usize {
        self.normal_nodes.len() + self.transition_nodes.len() + self.new_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// False iff a new topology change can safely start
    pub fn is_busy(&self) -> bool {
        self.transition_state.is_some() || !self.transition_nodes.is_empty()
    }

    pub(crate) fn ensure_not_busy(&self) -> Result<()> {
        if self.is_busy() {
            return Err(TopologyError::Busy {
                transition_state: self.transition_state,
                transitioning: self.transition_nodes.len(),
            });
        }
        Ok(())
    }

    pub fn get_request_param(&self, id: &NodeId) -> Option<&RequestParam> {
        self.req_param.get(id)
    }

    /// Nodes a single operation asks barriers to skip: the ignore list, the
    /// replaced node, and the node being removed.
    pub fn excluded_nodes_for(
        id: &NodeId,
        request: Option<TopologyRequest>,
        param: Option<&RequestParam>,
    ) -> BTreeSet<NodeId> {
        let mut excluded = param.map(RequestParam::ignored_nodes).unwrap_or_default();
        if let Some(replaced) = param.and_then(RequestParam::replaced_node) {
            excluded.insert(replaced);
        }
        if request == Some(TopologyRequest::Remove) {
            excluded.insert(*id);
        }
        excluded
    }

    /// Nodes currently excluded from synchronization; barriers do not wait for them
    pub fn get_excluded_nodes(&self) -> BTreeSet<NodeId> {
        let mut result = BTreeSet::new();
        for (id, rs) in &self.transition_nodes {
            if rs.state == NodeState::Removing {
                result.insert(*id);
            }
            let request = self.requests.get(id).copied();
            result.extend(Self::excluded_nodes_for(id, request, self.get_request_param(id)));
        }
        result
    }

    /// Ids of every node that has not left
    pub fn live_node_ids(&self) -> BTreeSet<NodeId> {
        self.normal_nodes
            .keys()
            .chain(self.transition_nodes.keys())
            .chain(self.new_nodes.keys())
            .copied()
            .collect()
    }

    /// Nodes whose supported features gate enabling: every normal node and
    /// every transitioning node that is normal again if its operation ends
    /// or rolls back
    fn feature_gating_nodes(&self) -> impl Iterator<Item = (&NodeId, &ReplicaState)> {
        self.normal_nodes.iter().chain(
            self.transition_nodes
                .iter()
                .filter(|(_, rs)| rs.state.retains_ring()),
        )
    }

    /// Features supported by every feature-gating node but not yet enabled
    pub fn calculate_not_yet_enabled_features(&self) -> BTreeSet<String> {
        self.features().calculate_not_yet_enabled_features()
    }

    pub fn features(&self) -> TopologyFeatures {
        TopologyFeatures {
            normal_supported_features: self
                .feature_gating_nodes()
                .map(|(id, rs)| (*id, rs.supported_features.clone()))
                .collect(),
            enabled_features: self.enabled_features.clone(),
        }
    }

    /// The queued request that must start next: by kind priority, then node id
    pub fn next_request(&self) -> Option<(NodeId, TopologyRequest)> {
        self.requests
            .iter()
            .map(|(id, req)| (*req, *id))
            .min()
            .map(|(req, id)| (id, req))
    }

    /// Reject work computed against a topology that has since been fenced off
    pub fn check_fencing(&self, token: FencingToken) -> Result<()> {
        if token.is_set() && token.topology_version < self.fence_version {
            return Err(TopologyError::StaleTopology {
                caller: token.topology_version,
                current: self.fence_version,
            });
        }
        Ok(())
    }

    /// Reject long-running work started under a session that is no longer current
    pub fn check_session(&self, session: SessionId) -> Result<()> {
        if session != self.session {
            return Err(TopologyError::StaleSession {
                operation: session.to_string(),
                current: self.session.to_string(),
            });
        }
        Ok(())
    }

    /// Check every structural invariant of the aggregate.
    ///
    /// A failure means the applied command sequence produced a corrupt state;
    /// callers must abort the apply rather than repair it.
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: String| Err(TopologyError::InvariantViolation(msg));

        // Partitions are disjoint
        let mut seen = BTreeMap::new();
        let partitions = [
            ("normal", self.normal_nodes.keys().collect::<Vec<_>>()),
            ("new", self.new_nodes.keys().collect()),
            ("transition", self.transition_nodes.keys().collect()),
            ("left", self.left_nodes.iter().collect()),
        ];
        for (name, ids) in &partitions {
            for id in ids {
                if let Some(other) = seen.insert(**id, *name) {
                    return violation(format!("node {} is both {} and {}", id, other, name));
                }
            }
        }

        // Node states match partitions; ring engagement follows the state
        for (id, rs) in &self.normal_nodes {
            if rs.state != NodeState::Normal {
                return violation(format!("normal node {} is in state {}", id, rs.state));
            }
            if rs.ring.is_none() {
                return violation(format!("normal node {} has no ring", id));
            }
        }
        for (id, rs) in &self.new_nodes {
            if rs.state != NodeState::None {
                return violation(format!("new node {} is in state {}", id, rs.state));
            }
            if rs.ring.is_some() {
                return violation(format!("new node {} owns tokens", id));
            }
        }
        for (id, rs) in &self.transition_nodes {
            if !rs.state.is_transitioning() {
                return violation(format!("transitioning node {} is in state {}", id, rs.state));
            }
            if rs.state.retains_ring() && rs.ring.is_none() {
                return violation(format!("node {} in state {} lost its ring", id, rs.state));
            }
        }

        // Node phases exist only while some node is operating
        if let Some(phase) = self.transition_state {
            if phase.is_node_phase() && self.transition_nodes.is_empty() {
                return violation(format!("phase {} has no transitioning node", phase));
            }
        }

        if self.fence_version > self.version {
            return violation(format!(
                "fence version {} is ahead of version {}",
                self.fence_version, self.version
            ));
        }

        // Requests target live nodes and carry parameters of the matching kind
        for (id, request) in &self.requests {
            if self.find(id).is_none() {
                return violation(format!("request {} for unknown node {}", request, id));
            }
            match (request.has_param(), self.req_param.get(id)) {
                (true, None) => {
                    return violation(format!("request {} for {} has no parameters", request, id))
                }
                (_, Some(param)) if param.request() != *request => {
                    return violation(format!(
                        "request {} for {} carries {} parameters",
                        request,
                        id,
                        param.request()
                    ))
                }
                _ => {}
            }
        }
        for id in self.req_param.keys() {
            if !self.requests.contains_key(id) && !self.transition_nodes.contains_key(id) {
                return violation(format!("parameters retained for idle node {}", id));
            }
        }

        if !self.cdc.is_sorted() {
            return violation("unpublished cdc generations are not sorted".to_string());
        }

        for (id, rs) in self.feature_gating_nodes() {
            let missing: Vec<_> = self
                .enabled_features
                .difference(&rs.supported_features)
                .collect();
            if !missing.is_empty() {
                return violation(format!(
                    "enabled features {:?} are not supported by {} node {}",
                    missing, rs.state, id
                ));
            }
        }

        Ok(())
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}
