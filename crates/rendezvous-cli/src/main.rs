//! rendezvous CLI - worker node と coordinator 操作
//!
//! ```text
//! rendezvous --config node.toml worker
//! rendezvous --config node.toml register worker-1
//! rendezvous --config node.toml publish worker-1 'core.echo.v1 {"message":"hi"}'
//! rendezvous --config node.toml results worker-1
//! rendezvous --config node.toml unlock worker-1 --peer
//! rendezvous send 127.0.0.1:7070 --name coordinator "status"
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use rendezvous_core::app::{Coordinator, NodeBuilder, QueueLock};
use rendezvous_core::config::NodeConfig;
use rendezvous_core::impls::FsStore;
use rendezvous_core::observability::{LogFormat, init_logging};
use rendezvous_core::repair;

#[derive(Debug, Parser)]
#[command(name = "rendezvous", version, about = "Store-rendezvous worker and coordinator")]
struct Cli {
    /// Node configuration (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "RENDEZVOUS_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format: pretty or json.
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a worker node until Ctrl-C.
    Worker,

    /// Create a node's queue and status blobs.
    Register { node: String },

    /// Append raw task lines (`<kind> <json>`) to a node's queue.
    Publish {
        node: String,
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Print and remove a node's result blobs (one JSON object per line).
    Results { node: String },

    /// Print a node's last published status.
    Status { node: String },

    /// List registered nodes.
    Nodes,

    /// Clear a node's queue locks left by a crashed process (both by default).
    Unlock {
        node: String,
        /// Only the producer-side lock.
        #[arg(long, conflicts_with = "peer")]
        owner: bool,
        /// Only the consumer-side lock.
        #[arg(long)]
        peer: bool,
    },

    /// Connect to a worker's listener and send command lines.
    Send {
        addr: SocketAddr,
        #[arg(long, default_value = "coordinator")]
        name: String,
        #[arg(long, default_value = "5000")]
        connect_timeout_ms: u64,
        #[arg(required = true)]
        lines: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    match cli.command {
        Commands::Worker => run_worker(config).await,
        Commands::Register { node } => {
            let paths = coordinator(&config).await?.register_node(&node).await?;
            println!("{}", paths.queue());
            Ok(())
        }
        Commands::Publish { node, tasks } => {
            coordinator(&config).await?.publish(&node, tasks.as_slice()).await?;
            info!(node = %node, count = tasks.len(), "published");
            Ok(())
        }
        Commands::Results { node } => {
            for result in coordinator(&config).await?.collect_results(&node).await? {
                println!("{}", serde_json::to_string(&result)?);
            }
            Ok(())
        }
        Commands::Status { node } => match coordinator(&config).await?.status(&node).await? {
            Some(status) => {
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(())
            }
            None => bail!("node {node} has not published a status"),
        },
        Commands::Nodes => {
            for node in coordinator(&config).await?.nodes().await? {
                println!("{node}");
            }
            Ok(())
        }
        Commands::Unlock { node, owner, peer } => {
            let cleared = coordinator(&config)
                .await?
                .force_unlock(&node, &unlock_targets(owner, peer))
                .await?;
            if cleared.is_empty() {
                info!(node = %node, "no queue lock was held");
            }
            for path in cleared {
                println!("{path}");
            }
            Ok(())
        }
        Commands::Send {
            addr,
            name,
            connect_timeout_ms,
            lines,
        } => send(addr, name, Duration::from_millis(connect_timeout_ms), lines).await,
    }
}

fn unlock_targets(owner: bool, peer: bool) -> Vec<QueueLock> {
    match (owner, peer) {
        (true, false) => vec![QueueLock::Owner],
        (false, true) => vec![QueueLock::Peer],
        _ => vec![QueueLock::Owner, QueueLock::Peer],
    }
}

async fn coordinator(config: &NodeConfig) -> Result<Coordinator> {
    let store = FsStore::open(config.store.root.clone())
        .await
        .with_context(|| format!("cannot open store at {}", config.store.root.display()))?;
    Ok(Coordinator::new(Arc::new(store), config.lock.poll_policy())
        .with_lock_timeout(config.lock.timeout()))
}

async fn run_worker(config: NodeConfig) -> Result<()> {
    let node = NodeBuilder::new(config)
        .with_builtins()?
        .build()
        .await
        .context("cannot build worker node")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C; shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    node.run(shutdown_rx).await?;
    Ok(())
}

async fn send(addr: SocketAddr, name: String, timeout: Duration, lines: Vec<String>) -> Result<()> {
    // RepairableResource は同期 I/O なので blocking pool で回す
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut link = repair::connect(addr, &name, timeout)
            .with_context(|| format!("cannot connect to {addr}"))?;
        for line in &lines {
            writeln!(link, "{line}")?;
        }
        link.flush()?;
        if link.repairs() > 0 {
            warn!(repairs = link.repairs(), "link was re-established while sending");
        }
        Ok(())
    })
    .await?
}
