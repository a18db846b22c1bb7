//! Coordinator side of the topology command protocol
//!
//! Commands fan out to peers in parallel and the phase may only advance if
//! every target answered `success` in time.

use crate::errors::{Result, TopologyError, TransportError};
use crate::topology::{CmdKind, NodeId, RaftTopologyCmd, RaftTopologyCmdResult, Topology};
use async_trait::async_trait;
use futures::future::join_all;
use slog::{debug, warn, Logger};
use std::collections::BTreeSet;
use std::time::Duration;

/// Delivers topology commands to peers
#[async_trait]
pub trait TopologyCmdTransport: Send + Sync {
    async fn send_cmd(
        &self,
        target: NodeId,
        cmd: RaftTopologyCmd,
    ) -> std::result::Result<RaftTopologyCmdResult, TransportError>;
}

/// Nodes a cluster-wide command goes to: every node holding or taking over
/// ring ownership, minus the excluded ones.
pub fn global_targets(topology: &Topology) -> BTreeSet<NodeId> {
    let excluded = topology.get_excluded_nodes();
    topology
        .normal_nodes
        .keys()
        .chain(topology.transition_nodes.keys())
        .filter(|id| !excluded.contains(id))
        .copied()
        .collect()
}

/// Send `cmd` to every target in parallel
///
/// All-or-nothing: the first target (in id order) that failed determines
/// the error.
///
/// # Arguments
/// * `transport` - Delivers the command to each peer
/// * `targets` - Nodes that must all succeed
/// * `cmd` - The command, carrying the coordinator's topology version
/// * `timeout` - Bound on the whole fan-out
/// * `logger` - Logger for send and failure records
///
/// # Returns
/// `Ok(())` once every target answered success
pub async fn exec_command(
    transport: &dyn TopologyCmdTransport,
    targets: &BTreeSet<NodeId>,
    cmd: RaftTopologyCmd,
    timeout: Duration,
    logger: &Logger,
) -> Result<()> {
    debug!(logger, "Sending topology command";
        "cmd" => %cmd.cmd,
        "version" => cmd.version,
        "targets" => targets.len()
    );

    let sends = targets.iter().map(|target| async move {
        (*target, transport.send_cmd(*target, cmd).await)
    });
    let results = match tokio::time::timeout(timeout, join_all(sends)).await {
        Ok(results) => results,
        Err(_) => {
            warn!(logger, "Topology command timed out";
                "cmd" => %cmd.cmd,
                "version" => cmd.version
            );
            return Err(TopologyError::CommandTimeout { cmd: cmd.cmd });
        }
    };

    for (node, result) in results {
        match result {
            Ok(result) if result.is_success() => {}
            Ok(_) => {
                warn!(logger, "Topology command failed on peer";
                    "cmd" => %cmd.cmd,
                    "node" => %node
                );
                return Err(TopologyError::CommandFailed { node, cmd: cmd.cmd });
            }
            Err(e) => {
                warn!(logger, "Failed to deliver topology command";
                    "cmd" => %cmd.cmd,
                    "node" => %node,
                    "error" => %e
                );
                return Err(e.into());
            }
        }
    }
    Ok(())
}

/// Send `cmd` to every non-excluded node at the topology's version
pub async fn exec_global_command(
    transport: &dyn TopologyCmdTransport,
    topology: &Topology,
    cmd: CmdKind,
    timeout: Duration,
    logger: &Logger,
) -> Result<()> {
    exec_command(
        transport,
        &global_targets(topology),
        RaftTopologyCmd::new(cmd, topology.version),
        timeout,
        logger,
    )
    .await
}
