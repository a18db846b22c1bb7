//! Peer side of the topology command protocol
//!
//! The coordinator sends `RaftTopologyCmd`s to every node; this is what a
//! node does when one arrives. Every command first waits until the local
//! topology has caught up with the coordinator's version. Draining and
//! streaming are fenced: a command computed against a topology older than
//! the fence is refused.

use super::TopologyRuntime;
use crate::errors::Result;
use crate::topology::{
    CmdKind, FencingToken, RaftTopologyCmd, RaftTopologyCmdResult, SessionId, Topology,
};
use async_trait::async_trait;
use slog::{debug, warn, Logger};
use std::sync::Arc;

/// Node-local services the command protocol drives but does not implement
#[async_trait]
pub trait PeerServices: Send + Sync {
    /// Stream the ranges this node gains under `topology`
    async fn stream_ranges(&self, topology: &Topology, session: SessionId) -> Result<()>;

    /// Wait until the addresses of every node in `topology` are known locally
    async fn wait_for_ip(&self, topology: &Topology) -> Result<()>;
}

/// Services with nothing to do (single-process clusters, tests)
pub struct NoopPeerServices;

#[async_trait]
impl PeerServices for NoopPeerServices {
    async fn stream_ranges(&self, _topology: &Topology, _session: SessionId) -> Result<()> {
        Ok(())
    }

    async fn wait_for_ip(&self, _topology: &Topology) -> Result<()> {
        Ok(())
    }
}

pub struct LocalCmdHandler {
    runtime: Arc<TopologyRuntime>,
    services: Arc<dyn PeerServices>,
    logger: Logger,
}

impl LocalCmdHandler {
    pub fn new(
        runtime: Arc<TopologyRuntime>,
        services: Arc<dyn PeerServices>,
        logger: Logger,
    ) -> Self {
        Self {
            runtime,
            services,
            logger,
        }
    }

    pub fn runtime(&self) -> &Arc<TopologyRuntime> {
        &self.runtime
    }

    /// Execute one command. Any failure is reported as `fail`; the
    /// coordinator decides whether to retry.
    pub async fn handle(&self, cmd: RaftTopologyCmd) -> RaftTopologyCmdResult {
        match self.execute(cmd).await {
            Ok(()) => {
                debug!(self.logger, "Topology command succeeded";
                    "cmd" => %cmd.cmd,
                    "version" => cmd.version
                );
                RaftTopologyCmdResult::success()
            }
            Err(e) => {
                warn!(self.logger, "Topology command failed";
                    "cmd" => %cmd.cmd,
                    "version" => cmd.version,
                    "error" => %e
                );
                RaftTopologyCmdResult::fail()
            }
        }
    }

    async fn execute(&self, cmd: RaftTopologyCmd) -> Result<()> {
        let topology = self.runtime.wait_for_version(cmd.version).await?;
        let fence = FencingToken::new(cmd.version);

        match cmd.cmd {
            CmdKind::Barrier => Ok(()),

            // Operations started before the barrier version must not outlive it
            CmdKind::BarrierAndDrain => {
                self.runtime.check_fencing(fence)?;
                self.runtime.operations().drain_below(cmd.version).await;
                Ok(())
            }

            CmdKind::StreamRanges => {
                self.runtime.check_fencing(fence)?;
                let session = topology.session;
                let _guard = self.runtime.operations().start(topology.version);
                self.services.stream_ranges(&topology, session).await?;
                // The operation may have been aborted while data was moving
                self.runtime.check_fencing(fence)?;
                self.runtime.check_session(session)
            }

            CmdKind::WaitForIp => self.services.wait_for_ip(&topology).await,
        }
    }
}
