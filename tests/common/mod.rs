//! In-process cluster used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use raft_topology::coordinator::{
    CommitLog, InProcessCmdTransport, InProcessCommitLog, TopologyCoordinator,
};
use raft_topology::runtime::{LocalCmdHandler, NoopPeerServices, PeerServices, TopologyRuntime};
use raft_topology::state_machine::{InMemoryMutationSink, TopologyCommand};
use raft_topology::topology::{NodeId, NodeInfo, SessionId, Topology, Version};
use raft_topology::{Result, TopologyConfig, TopologyError};
use slog::{Drain, Logger};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn create_logger() -> Logger {
    let decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, slog::o!())
}

pub fn node_info() -> NodeInfo {
    NodeInfo {
        datacenter: "dc1".to_string(),
        rack: "rack1".to_string(),
        release_version: "2025.1".to_string(),
        shard_count: 4,
        ignore_msb: 12,
        supported_features: BTreeSet::from(["range_tombstones".to_string()]),
    }
}

/// Streaming always fails on the node using these
pub struct FailingStreams;

#[async_trait]
impl PeerServices for FailingStreams {
    async fn stream_ranges(&self, _topology: &Topology, _session: SessionId) -> Result<()> {
        Err(TopologyError::Serialization("stream aborted by peer".to_string()))
    }

    async fn wait_for_ip(&self, _topology: &Topology) -> Result<()> {
        Ok(())
    }
}

/// Group0 members, one replica each. Members are not topology nodes until
/// they join.
pub struct TestCluster {
    pub nodes: Vec<NodeId>,
    pub replicas: BTreeMap<NodeId, Arc<TopologyRuntime>>,
    pub sinks: BTreeMap<NodeId, Arc<InMemoryMutationSink>>,
    pub log: Arc<InProcessCommitLog>,
    pub transport: Arc<InProcessCmdTransport>,
    pub coordinator: TopologyCoordinator,
    pub logger: Logger,
}

impl TestCluster {
    pub async fn new(size: usize) -> Self {
        Self::with_services(size, BTreeMap::new()).await
    }

    /// Cluster where member `i` uses `services[i]` instead of no-op services
    pub async fn with_services(
        size: usize,
        mut services: BTreeMap<usize, Arc<dyn PeerServices>>,
    ) -> Self {
        let logger = create_logger();
        let config = TopologyConfig::default()
            .with_barrier_timeout(Duration::from_secs(2))
            .with_command_timeout(Duration::from_secs(2));
        let transport = Arc::new(InProcessCmdTransport::new());

        let mut nodes: Vec<NodeId> = (0..size).map(|_| NodeId::new()).collect();
        nodes.sort();
        let mut replicas = BTreeMap::new();
        let mut sinks = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let sink = Arc::new(InMemoryMutationSink::new());
            let runtime = Arc::new(TopologyRuntime::new(
                &TopologyConfig::for_node(*node),
                sink.clone(),
                logger.new(slog::o!("node" => i)),
            ));
            let peer_services = services
                .remove(&i)
                .unwrap_or_else(|| Arc::new(NoopPeerServices) as Arc<dyn PeerServices>);
            let handler = LocalCmdHandler::new(runtime.clone(), peer_services, logger.clone());
            transport.register_node(*node, Arc::new(handler)).await;
            replicas.insert(*node, runtime);
            sinks.insert(*node, sink);
        }

        let log = Arc::new(InProcessCommitLog::new(
            nodes.iter().map(|node| replicas[node].clone()).collect(),
        ));
        let coordinator = TopologyCoordinator::new(
            replicas[&nodes[0]].clone(),
            log.clone(),
            transport.clone(),
            config,
            logger.clone(),
        );

        Self {
            nodes,
            replicas,
            sinks,
            log,
            transport,
            coordinator,
            logger,
        }
    }

    /// The coordinator's view
    pub fn topology(&self) -> Arc<Topology> {
        self.replicas[&self.nodes[0]].topology()
    }

    pub fn replica(&self, i: usize) -> &Arc<TopologyRuntime> {
        &self.replicas[&self.nodes[i]]
    }

    pub async fn commit(&self, command: TopologyCommand) -> Result<Version> {
        self.log.commit(command).await
    }

    pub async fn request_join(&self, i: usize, num_tokens: u32) -> Result<Uuid> {
        let request_id = Uuid::new_v4();
        self.commit(TopologyCommand::RequestJoin {
            node: self.nodes[i],
            info: node_info(),
            num_tokens,
            request_id,
        })
        .await?;
        Ok(request_id)
    }

    /// Join members `0..count` one after another
    pub async fn bootstrap(&self, count: usize, num_tokens: u32) {
        for i in 0..count {
            self.request_join(i, num_tokens)
                .await
                .expect("join request should be admitted");
            self.coordinator
                .run_until_idle()
                .await
                .expect("join should complete");
        }
    }

    /// Simulate a dead member: commands to it fail
    pub async fn kill(&self, i: usize) {
        self.transport.unregister_node(self.nodes[i]).await;
    }

    pub fn assert_replicas_agree(&self) {
        let expected = self.topology();
        for (node, replica) in &self.replicas {
            assert_eq!(
                replica.topology().as_ref(),
                expected.as_ref(),
                "replica {} diverged",
                node
            );
        }
    }
}
