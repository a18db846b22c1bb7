//! Topology coordinator
//!
//! Runs on the consensus leader. It reads the local topology, plans the next
//! phase of whatever operation is in flight (see `planner`), drives peers
//! through the command protocol (see `barrier`), and commits the resulting
//! topology changes through the `CommitLog`.

mod barrier;
pub mod in_process;
mod planner;

pub use barrier::{exec_command, exec_global_command, global_targets, TopologyCmdTransport};
pub use in_process::{InProcessCmdTransport, InProcessCommitLog};
pub use planner::{next_request, plan, CoordinatorAction};

use crate::config::TopologyConfig;
use crate::errors::{Result, TopologyError};
use crate::runtime::TopologyRuntime;
use crate::state_machine::TopologyCommand;
use crate::topology::{CdcGenerationId, CmdKind, RaftTopologyCmd, SessionId, Token, Topology, Version};
use async_trait::async_trait;
use slog::{debug, info, warn, Logger};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// The consensus log as the coordinator sees it
#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Commit `command` cluster-wide. Returns the topology version once the
    /// command has been applied locally.
    async fn commit(&self, command: TopologyCommand) -> Result<Version>;
}

/// Delay between committing a CDC generation and the moment it starts operating
const CDC_GENERATION_DELAY: Duration = Duration::from_secs(2);

pub struct TopologyCoordinator {
    runtime: Arc<TopologyRuntime>,
    log: Arc<dyn CommitLog>,
    transport: Arc<dyn TopologyCmdTransport>,
    config: TopologyConfig,
    logger: Logger,
}

impl TopologyCoordinator {
    pub fn new(
        runtime: Arc<TopologyRuntime>,
        log: Arc<dyn CommitLog>,
        transport: Arc<dyn TopologyCmdTransport>,
        config: TopologyConfig,
        logger: Logger,
    ) -> Self {
        Self {
            runtime,
            log,
            transport,
            config,
            logger,
        }
    }

    /// Plan against the current local topology
    pub fn plan(&self) -> Vec<CoordinatorAction> {
        plan(&self.runtime.topology())
    }

    /// Execute one plan. Returns false if there was nothing to do.
    pub async fn step(&self) -> Result<bool> {
        let actions = self.plan();
        if actions.is_empty() {
            return Ok(false);
        }
        for action in actions {
            self.execute(action).await?;
        }
        Ok(true)
    }

    /// Step until idle, a step fails, or `max_coordinator_steps` is reached.
    ///
    /// Returns the number of steps executed.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut steps = 0;
        while steps < self.config.max_coordinator_steps {
            match self.step().await {
                Ok(true) => steps += 1,
                Ok(false) => {
                    info!(self.logger, "Topology coordinator idle";
                        "steps" => steps,
                        "version" => self.runtime.version()
                    );
                    return Ok(steps);
                }
                Err(e) => {
                    warn!(self.logger, "Topology coordinator step failed";
                        "steps" => steps,
                        "version" => self.runtime.version(),
                        "error" => %e
                    );
                    return Err(e);
                }
            }
        }
        warn!(self.logger, "Topology coordinator stopped at step limit";
            "steps" => steps
        );
        Ok(steps)
    }

    /// Roll back the operation in flight, if it can be rolled back
    pub async fn abort_current(&self, reason: &str) -> Result<()> {
        let topology = self.runtime.topology();
        let Some(node) = topology.transition_nodes.keys().next().copied() else {
            return Ok(());
        };
        info!(self.logger, "Aborting topology operation";
            "node" => %node,
            "reason" => reason
        );
        self.commit(TopologyCommand::AbortNodeOperation {
            node,
            reason: reason.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn commit(&self, command: TopologyCommand) -> Result<Version> {
        debug!(self.logger, "Committing topology command"; "command" => command.name());
        self.log.commit(command).await
    }

    fn timeout_for(&self, cmd: CmdKind) -> Duration {
        match cmd {
            CmdKind::Barrier | CmdKind::BarrierAndDrain => self.config.barrier_timeout,
            CmdKind::StreamRanges | CmdKind::WaitForIp => self.config.command_timeout,
        }
    }

    async fn execute(&self, action: CoordinatorAction) -> Result<()> {
        match action {
            CoordinatorAction::Propose(command) => self.commit(command).await.map(|_| ()),

            CoordinatorAction::Broadcast { cmd, targets } => {
                let cmd = RaftTopologyCmd::new(cmd, self.runtime.version());
                exec_command(
                    self.transport.as_ref(),
                    &targets,
                    cmd,
                    self.timeout_for(cmd.cmd),
                    &self.logger,
                )
                .await
            }

            CoordinatorAction::StartOperation { node } => {
                let session = SessionId::new();
                info!(self.logger, "Starting topology operation";
                    "node" => %node,
                    "session" => %session
                );
                self.commit(TopologyCommand::StartNodeOperation { node, session })
                    .await
                    .map(|_| ())
            }

            CoordinatorAction::AssignRandomTokens { node, count } => {
                let tokens = random_tokens(&self.runtime.topology(), count);
                self.commit(TopologyCommand::AssignTokens { node, tokens })
                    .await
                    .map(|_| ())
            }

            CoordinatorAction::StageCdcGeneration => {
                let data_uuid = Uuid::new_v4();
                self.commit(TopologyCommand::StageCdcGeneration { data_uuid })
                    .await
                    .map(|_| ())
            }

            CoordinatorAction::CommitCdcGeneration { data_uuid } => {
                let generation = CdcGenerationId {
                    ts: generation_timestamp(&self.runtime.topology())?,
                    id: data_uuid,
                };
                info!(self.logger, "Committing CDC generation"; "generation" => %generation);
                self.commit(TopologyCommand::CommitCdcGeneration { generation })
                    .await
                    .map(|_| ())
            }
        }
    }
}

/// `count` random tokens owned by nobody in `topology`
fn random_tokens(topology: &Topology, count: usize) -> BTreeSet<Token> {
    let owned: BTreeSet<Token> = topology
        .normal_nodes
        .values()
        .chain(topology.transition_nodes.values())
        .filter_map(|rs| rs.ring.as_ref())
        .flat_map(|ring| ring.tokens.iter().copied())
        .collect();

    let mut tokens = BTreeSet::new();
    while tokens.len() < count {
        let token = Token(rand::random::<i64>());
        if !owned.contains(&token) {
            tokens.insert(token);
        }
    }
    tokens
}

/// Start time for a new generation, strictly after every generation already known
fn generation_timestamp(topology: &Topology) -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| TopologyError::CdcLedger(format!("system clock before epoch: {}", e)))?;
    let ts = (now + CDC_GENERATION_DELAY).as_millis() as u64;
    let latest = topology
        .cdc
        .unpublished_cdc_generations
        .last()
        .or(topology.cdc.current_cdc_generation_id.as_ref())
        .map(|g| g.ts);
    Ok(match latest {
        Some(latest) if latest >= ts => latest + 1,
        _ => ts,
    })
}
