//! Topology state machine
//!
//! Commands committed through consensus are applied here, producing events
//! for local subscribers and mutation batches for the persisted tables.

pub mod command;
pub mod event;
pub mod event_bus;
pub mod machine;
pub mod mutation;
pub mod traits;

pub use command::TopologyCommand;
pub use event::TopologyEvent;
pub use event_bus::{EventBus, VersionedEvent};
pub use machine::{AppliedCommand, TopologyStateMachine};
pub use mutation::{
    CanonicalMutation, InMemoryMutationSink, MutationBatch, MutationSink, RaftTopologySnapshot,
};
pub use traits::StateMachine;
