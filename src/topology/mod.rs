//! Topology data model
//!
//! The replicated description of the cluster: nodes and their lifecycle
//! stage, queued requests, the global transition phase, the CDC generation
//! ledger and the feature gate.

pub mod aggregate;
pub mod cdc;
pub mod command;
pub mod features;
pub mod fencing;
pub mod replica;
pub mod request;
pub mod types;

pub use aggregate::Topology;
pub use cdc::{CdcGenerationId, CdcGenerationLedger};
pub use command::{CmdKind, CmdStatus, RaftTopologyCmd, RaftTopologyCmdResult};
pub use features::TopologyFeatures;
pub use fencing::{FencingToken, Version};
pub use replica::{NodeInfo, ReplicaState, RingSlice, Token};
pub use request::{RequestParam, TopologyRequestState};
pub use types::{
    CleanupStatus, GlobalTopologyRequest, NodeId, NodeState, SessionId, TopologyRequest,
    TransitionState,
};
