// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command line interface.

use crate::config::{HostConfig, StartTrigger};
use crate::error::{HostError, Result};
use crate::session::{self, Session};
use clap::{Args, Parser, Subcommand};
use flowsolo_graph::{GraphKind, NodeState};
use flowsolo_nodes::HostServices;
use std::path::PathBuf;

/// Headless runner for `FlowSolo` graphs
#[derive(Parser, Debug)]
#[command(name = "flowsolo", version, about = "Run and inspect FlowSolo flow graphs")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a graph described by a host config
    Run(RunArgs),

    /// Check a graph template against the node library
    Validate(ValidateArgs),

    /// Print a saved runtime snapshot
    InspectSnapshot(InspectArgs),

    /// List the available node types
    ListNodes(ListArgs),

    /// Write a host config with default settings
    Init(InitArgs),
}

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Host config file (RON)
    #[arg(long, short, env = "FLOWSOLO_CONFIG", default_value = "flowsolo.ron")]
    pub config: PathBuf,

    /// Stop after this many ticks (overrides the config)
    #[arg(long)]
    pub max_ticks: Option<u64>,

    /// Ignore any saved snapshot and fire the start triggers
    #[arg(long)]
    pub fresh: bool,
}

/// Arguments for `validate`
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Graph template (RON)
    pub graph: PathBuf,

    /// Validate as this graph kind instead of the template's
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<GraphKind>,
}

/// Arguments for `inspect-snapshot`
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Snapshot file (`.ron` for RON, anything else for binary)
    pub file: PathBuf,

    /// Emit JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `list-nodes`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show types usable in this graph kind
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<GraphKind>,
}

/// Arguments for `init`
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Config file to create
    #[arg(default_value = "flowsolo.ron")]
    pub config: PathBuf,

    /// Graph template the config points at
    #[arg(long)]
    pub graph: Option<PathBuf>,

    /// Replace an existing file
    #[arg(long)]
    pub force: bool,
}

fn parse_kind(value: &str) -> std::result::Result<GraphKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "flow" => Ok(GraphKind::Flow),
        "cinematic" => Ok(GraphKind::Cinematic),
        other => Err(format!("unknown graph kind `{other}` (expected `flow` or `cinematic`)")),
    }
}

/// Execute a parsed command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate(args) => validate(args),
        Commands::InspectSnapshot(args) => inspect(args),
        Commands::ListNodes(args) => {
            list_nodes(args);
            Ok(())
        }
        Commands::Init(args) => init(args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = HostConfig::load(&args.config)?;
    if args.max_ticks.is_some() {
        config.max_ticks = args.max_ticks;
    }
    if args.fresh {
        config.snapshot.restore_on_start = false;
    }

    let mut session = Session::new(config)?;
    session.boot()?;
    let reason = session.run().await?;
    tracing::info!(
        graph = %session.graph().name,
        ticks = session.ticks(),
        ?reason,
        "session finished"
    );
    for (fact, value) in session.world().facts.entries() {
        tracing::debug!(%fact, value, "final fact");
    }
    Ok(())
}

fn validate(args: ValidateArgs) -> Result<()> {
    let mut graph = session::load_graph(&args.graph)?;
    if let Some(kind) = args.kind {
        graph.kind = kind;
    }
    let registry = flowsolo_nodes::default_registry(&HostServices::default());
    session::validate_graph(&graph, &registry)?;
    println!(
        "{}: {} nodes, {} connections, {:?} graph - ok",
        graph.name,
        graph.node_count(),
        graph.connection_count(),
        graph.kind
    );
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let snapshot = session::load_snapshot(&args.file)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("graph: {} (format v{})", snapshot.graph_name, snapshot.version);
    for (id, node) in &snapshot.nodes {
        let epoch = node.epoch.as_ref().map(ToString::to_string).unwrap_or_default();
        println!("  {id}  {:<18} {:<12?} {epoch}", node.node_type, node.state);
        if let Some(error) = &node.error {
            println!("      error: {error}");
        }
    }
    let active = snapshot
        .nodes
        .values()
        .filter(|n| n.state == NodeState::Active)
        .count();
    println!("{} nodes, {active} waiting", snapshot.nodes.len());
    Ok(())
}

fn init(args: InitArgs) -> Result<()> {
    if args.config.exists() && !args.force {
        return Err(HostError::Config(format!(
            "{} already exists (use --force to replace it)",
            args.config.display()
        )));
    }
    let mut config = HostConfig::default();
    if let Some(graph) = args.graph {
        config.graph = graph;
    }
    config.start.push(StartTrigger::node("Start"));
    config.save(&args.config)?;
    tracing::info!(path = %args.config.display(), "config written");
    Ok(())
}

fn list_nodes(args: ListArgs) {
    let registry = flowsolo_nodes::default_registry(&HostServices::default());
    for descriptor in registry.descriptors() {
        if args.kind.is_some_and(|kind| !descriptor.allows(kind)) {
            continue;
        }
        let inputs: Vec<&str> = descriptor.inputs.iter().map(|p| p.name.as_str()).collect();
        let outputs: Vec<&str> = descriptor.outputs.iter().map(|p| p.name.as_str()).collect();
        println!(
            "{:<18} {:<16} [{}] -> [{}]  {}",
            descriptor.id,
            descriptor.name,
            inputs.join(", "),
            outputs.join(", "),
            descriptor.description
        );
    }
}
