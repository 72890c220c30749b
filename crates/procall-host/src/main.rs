//! Procall Host - serves procall collections over local IPC.
//!
//! Binds a local endpoint, prints `IPC_ENDPOINT=<endpoint>` on stdout once it
//! is accepting connections, and serves until interrupted. Logs go to stderr
//! so stdout stays machine-readable for the parent process.

mod objects;

use anyhow::{Context, Result};
use clap::Parser;
use procall_core::{Endpoint, IpcServer, Registry};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "procall-host")]
#[command(about = "Host process for procall cross-process calls")]
struct Args {
    /// Endpoint to listen on: tcp://127.0.0.1:PORT or unix:///path/to.sock
    #[arg(short, long)]
    endpoint: Option<Endpoint>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Do not install the built-in System collection
    #[arg(long)]
    no_system: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides the level flag
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting procall host");

    let mut builder = Registry::builder().with_collection(objects::collection()?)?;
    if !args.no_system {
        builder = builder.with_system();
    }
    let registry = builder.seal().context("failed to build registry")?;

    let endpoint = args.endpoint.unwrap_or_else(default_endpoint);
    let mut server = IpcServer::start(&endpoint, Arc::new(registry))
        .await
        .with_context(|| format!("failed to listen on {}", endpoint))?;

    // Print the endpoint for the parent process to read (intentional stdout)
    println!("IPC_ENDPOINT={}", server.endpoint());

    info!("Host running on {}", server.endpoint());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown();

    Ok(())
}

#[cfg(unix)]
fn default_endpoint() -> Endpoint {
    let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    Endpoint::Unix(dir.join(format!("procall-{}.sock", std::process::id())))
}

#[cfg(not(unix))]
fn default_endpoint() -> Endpoint {
    Endpoint::tcp_ephemeral()
}
