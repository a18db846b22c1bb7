//! In-process commit log and command transport for testing
//!
//! Every replica is a `TopologyRuntime` in the same process. Committing a
//! command applies it to each replica in turn, and topology commands are
//! delivered straight to each node's `LocalCmdHandler`.

use super::{CommitLog, TopologyCmdTransport};
use crate::errors::{Result, TopologyError, TransportError};
use crate::runtime::{LocalCmdHandler, TopologyRuntime};
use crate::state_machine::TopologyCommand;
use crate::topology::{NodeId, RaftTopologyCmd, RaftTopologyCmdResult, Version};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Commit log that applies every command to a fixed set of replicas.
///
/// The first replica plays the leader: its result is the commit result, and
/// a command it rejects is never applied anywhere.
pub struct InProcessCommitLog {
    replicas: Vec<Arc<TopologyRuntime>>,
    /// Serializes commits so all replicas see one order
    order: Mutex<Vec<TopologyCommand>>,
}

impl InProcessCommitLog {
    pub fn new(replicas: Vec<Arc<TopologyRuntime>>) -> Self {
        Self {
            replicas,
            order: Mutex::new(Vec::new()),
        }
    }

    /// Every command committed so far
    pub async fn entries(&self) -> Vec<TopologyCommand> {
        self.order.lock().await.clone()
    }
}

#[async_trait]
impl CommitLog for InProcessCommitLog {
    async fn commit(&self, command: TopologyCommand) -> Result<Version> {
        let mut order = self.order.lock().await;
        let (leader, followers) = self.replicas.split_first().ok_or_else(|| {
            TransportError::CommitFailed {
                reason: "no replicas".to_string(),
            }
        })?;

        let version = leader.apply_committed(&command).await?;
        for follower in followers {
            let applied = follower.apply_committed(&command).await?;
            if applied != version {
                return Err(TopologyError::InvariantViolation(format!(
                    "replica diverged: version {} instead of {}",
                    applied, version
                )));
            }
        }
        order.push(command);
        Ok(version)
    }
}

/// Routes topology commands to registered handlers
#[derive(Default)]
pub struct InProcessCmdTransport {
    handlers: Mutex<BTreeMap<NodeId, Arc<LocalCmdHandler>>>,
}

impl InProcessCmdTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_node(&self, node: NodeId, handler: Arc<LocalCmdHandler>) {
        self.handlers.lock().await.insert(node, handler);
    }

    /// Unregister a node; commands to it fail with `PeerNotFound`
    pub async fn unregister_node(&self, node: NodeId) {
        self.handlers.lock().await.remove(&node);
    }

    pub async fn node_count(&self) -> usize {
        self.handlers.lock().await.len()
    }
}

#[async_trait]
impl TopologyCmdTransport for InProcessCmdTransport {
    async fn send_cmd(
        &self,
        target: NodeId,
        cmd: RaftTopologyCmd,
    ) -> std::result::Result<RaftTopologyCmdResult, TransportError> {
        // Not held while the handler runs: handlers may block on barriers
        let handler = self
            .handlers
            .lock()
            .await
            .get(&target)
            .cloned()
            .ok_or(TransportError::PeerNotFound { node_id: target })?;
        Ok(handler.handle(cmd).await)
    }
}
