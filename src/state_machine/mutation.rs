//! Persisted form of the topology
//!
//! Every applied command is described as a batch of row mutations in three
//! categories: topology rows (one per node plus a static row), CDC generation
//! rows, and request status rows. The same row shapes make up a full
//! snapshot, which `load_topology` turns back into a validated aggregate.
//!
//! Enum-valued columns are stored as their canonical strings and parsed
//! strictly on load.

use crate::errors::{Result, TopologyError};
use crate::topology::{
    CdcGenerationId, CdcGenerationLedger, CleanupStatus, GlobalTopologyRequest, NodeId, NodeState,
    ReplicaState, RequestParam, RingSlice, SessionId, Token, Topology, TopologyRequest,
    TopologyRequestState, TransitionState, Version,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub const TOPOLOGY_TABLE: &str = "system.topology";
pub const CDC_GENERATIONS_TABLE: &str = "system.cdc_generations_v3";
pub const TOPOLOGY_REQUESTS_TABLE: &str = "system.topology_requests";

/// Key of the cluster-wide row in the topology table
pub const STATIC_ROW_KEY: &str = "static";

/// One row write. Opaque to everything except `load_topology`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMutation {
    pub table: String,
    pub key: String,
    pub row: serde_json::Value,
}

impl CanonicalMutation {
    fn new<T: Serialize>(table: &str, key: impl Into<String>, row: &T) -> Result<Self> {
        Ok(Self {
            table: table.to_string(),
            key: key.into(),
            row: serde_json::to_value(row)?,
        })
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.row.clone())?)
    }
}

/// Rows written by one applied command
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationBatch {
    pub topology_mutations: Vec<CanonicalMutation>,
    pub cdc_generation_mutations: Vec<CanonicalMutation>,
    pub topology_requests_mutations: Vec<CanonicalMutation>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.topology_mutations.is_empty()
            && self.cdc_generation_mutations.is_empty()
            && self.topology_requests_mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.topology_mutations.len()
            + self.cdc_generation_mutations.len()
            + self.topology_requests_mutations.len()
    }

    fn iter(&self) -> impl Iterator<Item = &CanonicalMutation> {
        self.topology_mutations
            .iter()
            .chain(&self.cdc_generation_mutations)
            .chain(&self.topology_requests_mutations)
    }
}

/// The whole topology as rows, in the same three categories as a batch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RaftTopologySnapshot {
    pub topology_mutations: Vec<CanonicalMutation>,
    pub cdc_generation_mutations: Vec<CanonicalMutation>,
    pub topology_requests_mutations: Vec<CanonicalMutation>,
}

impl From<MutationBatch> for RaftTopologySnapshot {
    fn from(batch: MutationBatch) -> Self {
        Self {
            topology_mutations: batch.topology_mutations,
            cdc_generation_mutations: batch.cdc_generation_mutations,
            topology_requests_mutations: batch.topology_requests_mutations,
        }
    }
}

/// Row of a single node in the topology table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct NodeRow {
    node_state: String,
    datacenter: String,
    rack: String,
    release_version: String,
    tokens: Option<BTreeSet<i64>>,
    shard_count: usize,
    ignore_msb: u8,
    supported_features: BTreeSet<String>,
    cleanup_status: String,
    request_id: Uuid,
    topology_request: Option<String>,
    request_param: Option<RequestParam>,
}

impl NodeRow {
    fn live(id: &NodeId, rs: &ReplicaState, topology: &Topology) -> Self {
        Self {
            node_state: rs.state.to_string(),
            datacenter: rs.datacenter.clone(),
            rack: rs.rack.clone(),
            release_version: rs.release_version.clone(),
            tokens: rs
                .ring
                .as_ref()
                .map(|ring| ring.tokens.iter().map(|t| t.0).collect()),
            shard_count: rs.shard_count,
            ignore_msb: rs.ignore_msb,
            supported_features: rs.supported_features.clone(),
            cleanup_status: rs.cleanup.to_string(),
            request_id: rs.request_id,
            topology_request: topology.requests.get(id).map(ToString::to_string),
            request_param: topology.req_param.get(id).cloned(),
        }
    }

    fn left() -> Self {
        Self {
            node_state: NodeState::Left.to_string(),
            cleanup_status: CleanupStatus::Clean.to_string(),
            ..Self::default()
        }
    }

    fn into_replica(self) -> Result<ReplicaState> {
        Ok(ReplicaState {
            state: self.node_state.parse()?,
            datacenter: self.datacenter,
            rack: self.rack,
            release_version: self.release_version,
            ring: self
                .tokens
                .map(|tokens| RingSlice::new(tokens.into_iter().map(Token))),
            shard_count: self.shard_count,
            ignore_msb: self.ignore_msb,
            supported_features: self.supported_features,
            cleanup: self.cleanup_status.parse()?,
            request_id: self.request_id,
        })
    }
}

/// The cluster-wide row of the topology table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct StaticRow {
    transition_state: Option<String>,
    version: Version,
    fence_version: Version,
    global_topology_request: Option<String>,
    current_cdc_generation: Option<CdcGenerationId>,
    new_cdc_generation_data_uuid: Option<Uuid>,
    unpublished_cdc_generations: Vec<CdcGenerationId>,
    enabled_features: BTreeSet<String>,
    session: Uuid,
    tablet_balancing_enabled: bool,
}

impl StaticRow {
    fn of(topology: &Topology) -> Self {
        Self {
            transition_state: topology.transition_state.map(|s| s.to_string()),
            version: topology.version,
            fence_version: topology.fence_version,
            global_topology_request: topology.global_request.map(|r| r.to_string()),
            current_cdc_generation: topology.cdc.current_cdc_generation_id,
            new_cdc_generation_data_uuid: topology.cdc.new_cdc_generation_data_uuid,
            unpublished_cdc_generations: topology.cdc.unpublished_cdc_generations.clone(),
            enabled_features: topology.enabled_features.clone(),
            session: *topology.session.as_uuid(),
            tablet_balancing_enabled: topology.tablet_balancing_enabled,
        }
    }
}

fn node_rows(topology: &Topology) -> BTreeMap<NodeId, NodeRow> {
    let live = topology
        .normal_nodes
        .iter()
        .chain(&topology.transition_nodes)
        .chain(&topology.new_nodes)
        .map(|(id, rs)| (*id, NodeRow::live(id, rs, topology)));
    let left = topology.left_nodes.iter().map(|id| (*id, NodeRow::left()));
    live.chain(left).collect()
}

/// Every generation the ledger knows about
fn cdc_generations(topology: &Topology) -> BTreeSet<CdcGenerationId> {
    topology
        .cdc
        .current_cdc_generation_id
        .iter()
        .chain(&topology.cdc.unpublished_cdc_generations)
        .copied()
        .collect()
}

/// Rows that differ between `old` and `new`; with no `old`, every row.
pub fn diff(old: Option<&Topology>, new: &Topology) -> Result<MutationBatch> {
    let mut batch = MutationBatch::default();

    let old_nodes = old.map(node_rows).unwrap_or_default();
    for (id, row) in node_rows(new) {
        if old_nodes.get(&id) != Some(&row) {
            batch
                .topology_mutations
                .push(CanonicalMutation::new(TOPOLOGY_TABLE, id.to_string(), &row)?);
        }
    }
    let row = StaticRow::of(new);
    if old.map(StaticRow::of).as_ref() != Some(&row) {
        batch
            .topology_mutations
            .push(CanonicalMutation::new(TOPOLOGY_TABLE, STATIC_ROW_KEY, &row)?);
    }

    let old_generations = old.map(cdc_generations).unwrap_or_default();
    for generation in cdc_generations(new).difference(&old_generations) {
        batch.cdc_generation_mutations.push(CanonicalMutation::new(
            CDC_GENERATIONS_TABLE,
            generation.id.to_string(),
            generation,
        )?);
    }

    for (id, state) in &new.request_states {
        if old.and_then(|t| t.request_states.get(id)) != Some(state) {
            batch.topology_requests_mutations.push(CanonicalMutation::new(
                TOPOLOGY_REQUESTS_TABLE,
                id.to_string(),
                state,
            )?);
        }
    }

    Ok(batch)
}

pub fn snapshot(topology: &Topology) -> Result<RaftTopologySnapshot> {
    diff(None, topology).map(RaftTopologySnapshot::from)
}

/// Rebuild a topology from persisted rows.
///
/// Later rows for the same key replace earlier ones, so a snapshot followed
/// by any number of batches loads the latest state. Unknown enum strings fail
/// with `TopologyError::Parse`.
pub fn load_topology<'a>(
    rows: impl IntoIterator<Item = &'a CanonicalMutation>,
) -> Result<Topology> {
    let mut latest: BTreeMap<(&str, &str), &CanonicalMutation> = BTreeMap::new();
    for m in rows {
        latest.insert((m.table.as_str(), m.key.as_str()), m);
    }

    let mut topology = Topology::new();
    let mut saw_static = false;

    for ((table, key), m) in latest {
        match table {
            TOPOLOGY_TABLE if key == STATIC_ROW_KEY => {
                let row: StaticRow = m.decode()?;
                topology.transition_state = row
                    .transition_state
                    .map(|s| s.parse::<TransitionState>())
                    .transpose()?;
                topology.version = row.version;
                topology.fence_version = row.fence_version;
                topology.global_request = row
                    .global_topology_request
                    .map(|s| s.parse::<GlobalTopologyRequest>())
                    .transpose()?;
                topology.cdc = CdcGenerationLedger {
                    current_cdc_generation_id: row.current_cdc_generation,
                    new_cdc_generation_data_uuid: row.new_cdc_generation_data_uuid,
                    unpublished_cdc_generations: row.unpublished_cdc_generations,
                };
                topology.enabled_features = row.enabled_features;
                topology.session = SessionId::from_uuid(row.session);
                topology.tablet_balancing_enabled = row.tablet_balancing_enabled;
                saw_static = true;
            }
            TOPOLOGY_TABLE => {
                let id: NodeId = key
                    .parse()
                    .map_err(|_| TopologyError::Serialization(format!("bad node key {}", key)))?;
                let mut row: NodeRow = m.decode()?;
                let request = row
                    .topology_request
                    .take()
                    .map(|s| s.parse::<TopologyRequest>())
                    .transpose()?;
                let param = row.request_param.take();
                let rs = row.into_replica()?;
                match rs.state {
                    NodeState::Left => {
                        topology.left_nodes.insert(id);
                        continue;
                    }
                    NodeState::Normal => topology.normal_nodes.insert(id, rs),
                    NodeState::None => topology.new_nodes.insert(id, rs),
                    _ => topology.transition_nodes.insert(id, rs),
                };
                if let Some(request) = request {
                    topology.requests.insert(id, request);
                }
                if let Some(param) = param {
                    topology.req_param.insert(id, param);
                }
            }
            TOPOLOGY_REQUESTS_TABLE => {
                let id: Uuid = key.parse().map_err(|_| {
                    TopologyError::Serialization(format!("bad request key {}", key))
                })?;
                topology.request_states.insert(id, m.decode()?);
            }
            // Generation rows carry no state the static row does not already have
            CDC_GENERATIONS_TABLE => {}
            other => {
                return Err(TopologyError::Serialization(format!(
                    "unknown table {}",
                    other
                )))
            }
        }
    }

    if !saw_static && !topology.live_node_ids().is_empty() {
        return Err(TopologyError::Serialization(
            "node rows without a static row".to_string(),
        ));
    }

    topology.validate()?;
    Ok(topology)
}

pub fn load_snapshot(snapshot: &RaftTopologySnapshot) -> Result<Topology> {
    load_topology(
        snapshot
            .topology_mutations
            .iter()
            .chain(&snapshot.cdc_generation_mutations)
            .chain(&snapshot.topology_requests_mutations),
    )
}

/// Destination of applied mutation batches (the local system tables)
pub trait MutationSink: Send + Sync {
    fn apply(&self, batch: &MutationBatch) -> Result<()>;
}

/// Sink that keeps the latest row per key in memory
#[derive(Default)]
pub struct InMemoryMutationSink {
    rows: Mutex<BTreeMap<(String, String), CanonicalMutation>>,
}

impl InMemoryMutationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Current contents, split into the three categories
    pub fn to_snapshot(&self) -> RaftTopologySnapshot {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = RaftTopologySnapshot::default();
        for m in rows.values() {
            let category = match m.table.as_str() {
                CDC_GENERATIONS_TABLE => &mut snapshot.cdc_generation_mutations,
                TOPOLOGY_REQUESTS_TABLE => &mut snapshot.topology_requests_mutations,
                _ => &mut snapshot.topology_mutations,
            };
            category.push(m.clone());
        }
        snapshot
    }

    pub fn load(&self) -> Result<Topology> {
        load_snapshot(&self.to_snapshot())
    }
}

impl MutationSink for InMemoryMutationSink {
    fn apply(&self, batch: &MutationBatch) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for m in batch.iter() {
            rows.insert((m.table.clone(), m.key.clone()), m.clone());
        }
        Ok(())
    }
}
