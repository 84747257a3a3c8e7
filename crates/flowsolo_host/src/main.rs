// SPDX-License-Identifier: MIT OR Apache-2.0
//! `FlowSolo` host - headless runner for flow graphs
//!
//! Loads a graph template and a host config, drives the execution engine on a
//! fixed tick, feeds it events from a simulated world, and saves runtime state
//! so an interrupted flow resumes where it stopped.
//!
//! ## Commands
//!
//! - `run`: execute a graph until it goes idle, hits a tick limit, or is interrupted
//! - `validate`: check a graph template against the node library
//! - `inspect-snapshot`: print a saved runtime snapshot
//! - `list-nodes`: list the node types the host provides
//! - `init`: write a starter host config

mod cli;
mod config;
mod error;
mod session;
mod world;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("flowsolo_host=info,flowsolo_graph=info,flowsolo_nodes=info")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting FlowSolo v{}", env!("CARGO_PKG_VERSION"));

    let cli = cli::Cli::parse();
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("FlowSolo failed: {e}");
        std::process::exit(1);
    }
}
