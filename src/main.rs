use clap::Parser;
use log::{error, info, warn};
use raft_topology::coordinator::{InProcessCmdTransport, InProcessCommitLog, TopologyCoordinator};
use raft_topology::runtime::{LocalCmdHandler, NoopPeerServices, TopologyRuntime};
use raft_topology::state_machine::{InMemoryMutationSink, TopologyCommand};
use raft_topology::topology::NodeId;
use raft_topology::TopologyConfig;
use slog::Drain;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "raft-topology")]
#[command(about = "Replay topology commands and print the resulting cluster topology", long_about = None)]
struct Args {
    /// File with one JSON-encoded topology command per line
    #[arg(short, long)]
    commands: PathBuf,

    /// Id of the local node (readiness is reported for this node)
    #[arg(short, long)]
    local_node: Option<NodeId>,

    /// After replaying, drive pending operations to completion with an in-process coordinator
    #[arg(long, default_value_t = false)]
    coordinate: bool,

    /// Keep replaying when a command is rejected
    #[arg(long, default_value_t = false)]
    keep_going: bool,
}

fn create_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let logger = create_logger();

    let config = match args.local_node {
        Some(node) => TopologyConfig::for_node(node),
        None => TopologyConfig::new(),
    };
    let runtime = Arc::new(TopologyRuntime::new(
        &config,
        Arc::new(InMemoryMutationSink::new()),
        logger.clone(),
    ));

    let input = std::fs::read_to_string(&args.commands)?;
    let mut applied = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command: TopologyCommand = serde_json::from_str(line)
            .map_err(|e| format!("line {}: invalid command: {}", index + 1, e))?;

        match runtime.apply_committed(&command).await {
            Ok(_) => applied += 1,
            Err(e) if args.keep_going => {
                warn!("line {}: {} rejected: {}", index + 1, command.name(), e);
            }
            Err(e) => {
                error!("line {}: {} rejected: {}", index + 1, command.name(), e);
                return Err(e.into());
            }
        }
    }
    info!("Applied {} commands, topology version {}", applied, runtime.version());

    if args.coordinate {
        let transport = Arc::new(InProcessCmdTransport::new());
        for node in runtime.topology().live_node_ids() {
            let handler = LocalCmdHandler::new(
                runtime.clone(),
                Arc::new(NoopPeerServices),
                logger.clone(),
            );
            transport.register_node(node, Arc::new(handler)).await;
        }
        let coordinator = TopologyCoordinator::new(
            runtime.clone(),
            Arc::new(InProcessCommitLog::new(vec![runtime.clone()])),
            transport,
            config.clone(),
            logger.clone(),
        );
        let steps = coordinator.run_until_idle().await?;
        info!("Coordinator finished after {} steps", steps);
    }

    info!("Ready: {}", runtime.is_ready());
    println!("{}", serde_json::to_string_pretty(runtime.topology().as_ref())?);

    Ok(())
}
