//! Replicated topology handle
//!
//! `TopologyRuntime` owns the local state machine. The consensus layer feeds
//! it committed commands one at a time through `apply_committed`; everything
//! else reads immutable snapshots and waits on versions.
//!
//! Each apply persists its mutation batch, publishes the new snapshot to
//! waiters, recomputes readiness, and broadcasts the command's events.

mod handler;
mod tracker;

pub use handler::{LocalCmdHandler, NoopPeerServices, PeerServices};
pub use tracker::{OperationGuard, OperationTracker};

use crate::config::TopologyConfig;
use crate::errors::{Result, TransportError};
use crate::state_machine::mutation;
use crate::state_machine::{
    EventBus, MutationSink, RaftTopologySnapshot, TopologyCommand, TopologyStateMachine,
    VersionedEvent,
};
use crate::topology::{FencingToken, NodeId, SessionId, Topology, Version};
use slog::{error, info, Logger};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

pub struct TopologyRuntime {
    local_node: Option<NodeId>,

    /// Single writer: applies are serialized behind this lock
    machine: Mutex<TopologyStateMachine>,

    topology_tx: watch::Sender<Arc<Topology>>,
    ready_tx: watch::Sender<bool>,
    event_bus: EventBus,
    sink: Arc<dyn MutationSink>,
    operations: Arc<OperationTracker>,
    logger: Logger,
}

impl TopologyRuntime {
    /// Runtime for a brand new cluster (empty topology at version 1)
    pub fn new(config: &TopologyConfig, sink: Arc<dyn MutationSink>, logger: Logger) -> Self {
        let machine = TopologyStateMachine::new(logger.clone());
        Self::from_machine(config, machine, sink, logger)
    }

    /// Runtime resuming from a persisted topology
    pub fn with_topology(
        config: &TopologyConfig,
        topology: Topology,
        sink: Arc<dyn MutationSink>,
        logger: Logger,
    ) -> Result<Self> {
        let machine = TopologyStateMachine::from_topology(topology, logger.clone())?;
        Ok(Self::from_machine(config, machine, sink, logger))
    }

    fn from_machine(
        config: &TopologyConfig,
        machine: TopologyStateMachine,
        sink: Arc<dyn MutationSink>,
        logger: Logger,
    ) -> Self {
        let topology = Arc::new(machine.topology().clone());
        let ready = is_ready(config.local_node, &topology);
        let (topology_tx, _) = watch::channel(topology);
        let (ready_tx, _) = watch::channel(ready);

        info!(logger, "Topology runtime started";
            "local_node" => ?config.local_node,
            "version" => machine.version(),
            "ready" => ready
        );

        Self {
            local_node: config.local_node,
            machine: Mutex::new(machine),
            topology_tx,
            ready_tx,
            event_bus: EventBus::new(config.event_bus_capacity),
            sink,
            operations: OperationTracker::new(),
            logger,
        }
    }

    /// Apply a command committed by consensus and wake everyone waiting on the topology
    ///
    /// A rejected command changes nothing and wakes nobody. If the sink
    /// fails, the new topology is still published.
    ///
    /// # Arguments
    /// * `command` - The committed command
    ///
    /// # Returns
    /// The new topology version, or the rejection or sink error
    pub async fn apply_committed(&self, command: &TopologyCommand) -> Result<Version> {
        let mut machine = self.machine.lock().await;
        let applied = machine.apply_command(command)?;

        // The machine has already advanced; publish it even if persisting failed
        let persisted = self.sink.apply(&applied.mutations);
        if let Err(e) = &persisted {
            error!(self.logger, "Failed to persist topology mutations";
                "version" => applied.version,
                "error" => %e
            );
        }

        let topology = Arc::new(machine.topology().clone());
        let ready = is_ready(self.local_node, &topology);
        self.topology_tx.send_replace(topology);
        self.ready_tx.send_if_modified(|current| {
            if *current == ready {
                return false;
            }
            *current = ready;
            true
        });

        // Published under the lock so subscribers see versions in order
        self.event_bus.publish_batch(applied.version, applied.events);
        persisted.map(|_| applied.version)
    }

    /// Current immutable snapshot
    pub fn topology(&self) -> Arc<Topology> {
        self.topology_tx.borrow().clone()
    }

    pub fn version(&self) -> Version {
        self.topology_tx.borrow().version
    }

    pub fn local_node(&self) -> Option<NodeId> {
        self.local_node
    }

    /// Receiver woken on every applied command
    pub fn subscribe(&self) -> watch::Receiver<Arc<Topology>> {
        self.topology_tx.subscribe()
    }

    /// Wait until the local topology has reached `version`
    pub async fn wait_for_version(&self, version: Version) -> Result<Arc<Topology>> {
        self.wait_until(|t| t.version >= version).await
    }

    /// Wait until `predicate` holds for the local topology, re-checking after every apply
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<Arc<Topology>>
    where
        F: FnMut(&Topology) -> bool,
    {
        let mut rx = self.topology_tx.subscribe();
        let topology = rx
            .wait_for(|t| predicate(t.as_ref()))
            .await
            .map_err(|_| TransportError::Other("topology runtime shut down".to_string()))?;
        Ok(topology.clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<VersionedEvent> {
        self.event_bus.subscribe()
    }

    /// Readiness to serve clients; see `is_ready`
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Token for work computed against the current topology
    pub fn fencing_token(&self) -> FencingToken {
        FencingToken::new(self.version())
    }

    pub fn check_fencing(&self, token: FencingToken) -> Result<()> {
        self.topology_tx.borrow().check_fencing(token)
    }

    pub fn check_session(&self, session: SessionId) -> Result<()> {
        self.topology_tx.borrow().check_session(session)
    }

    pub fn operations(&self) -> &Arc<OperationTracker> {
        &self.operations
    }

    pub async fn snapshot_mutations(&self) -> Result<RaftTopologySnapshot> {
        self.machine.lock().await.snapshot_mutations()
    }

    /// Replace the local state with a snapshot received from the leader
    pub async fn restore(&self, snapshot: &RaftTopologySnapshot) -> Result<()> {
        let mut machine = self.machine.lock().await;
        machine.restore_mutations(snapshot)?;
        self.sink.apply(&mutation::diff(None, machine.topology())?)?;

        let topology = Arc::new(machine.topology().clone());
        let ready = is_ready(self.local_node, &topology);
        self.topology_tx.send_replace(topology);
        self.ready_tx.send_replace(ready);
        Ok(())
    }
}

/// Whether the node should serve clients.
///
/// With a local node: it is a normal node. Without one: some node is normal
/// and no topology change is in flight.
pub fn is_ready(local_node: Option<NodeId>, topology: &Topology) -> bool {
    match local_node {
        Some(node) => topology.normal_nodes.contains_key(&node),
        None => !topology.normal_nodes.is_empty() && !topology.is_busy(),
    }
}
