//! Configuration for a topology node

use crate::topology::NodeId;
use std::time::Duration;

/// Configuration for the topology runtime and coordinator on one node.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// This node's id. Readiness tracks whether this node is normal.
    /// If None, readiness tracks whether the cluster has a quiescent normal node.
    pub local_node: Option<NodeId>,

    /// Events buffered per event bus subscriber (default: 100)
    pub event_bus_capacity: usize,

    /// How long a barrier fan-out waits for every peer (default: 10s)
    pub barrier_timeout: Duration,

    /// How long other topology commands, such as streaming, may take (default: 30s)
    pub command_timeout: Duration,

    /// Upper bound on steps one coordinator run executes (default: 64)
    pub max_coordinator_steps: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            local_node: None,
            event_bus_capacity: 100,
            barrier_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            max_coordinator_steps: 64,
        }
    }
}

impl TopologyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a specific node
    pub fn for_node(node: NodeId) -> Self {
        Self {
            local_node: Some(node),
            ..Default::default()
        }
    }

    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_max_coordinator_steps(mut self, steps: usize) -> Self {
        self.max_coordinator_steps = steps;
        self
    }
}
