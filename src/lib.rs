pub mod config;
pub mod coordinator;
pub mod errors;
pub mod runtime;
pub mod state_machine;
pub mod topology;

pub use config::TopologyConfig;
pub use coordinator::{CommitLog, CoordinatorAction, TopologyCmdTransport, TopologyCoordinator};
pub use errors::{ParseEnumError, Result, TopologyError, TransportError};
pub use runtime::{LocalCmdHandler, PeerServices, TopologyRuntime};
pub use state_machine::{
    MutationBatch, MutationSink, RaftTopologySnapshot, TopologyCommand, TopologyEvent,
    TopologyStateMachine,
};
pub use topology::{
    FencingToken, NodeId, NodeState, ReplicaState, RequestParam, Topology, TopologyRequest,
    TransitionState,
};
