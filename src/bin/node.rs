//! Ensemble node binary

use clap::{Parser, Subcommand};
use minizab::common::{Config, StorageBackend};
use minizab::ZabServer;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minizab-node")]
#[command(about = "minizab ensemble member with atomic broadcast")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Config file (TOML); MINIZAB_* environment variables apply on top
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node identity (host:port peers use to reach it)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Every ensemble member (comma-separated)
        #[arg(long, value_delimiter = ',')]
        servers: Vec<String>,

        /// Leader at startup
        #[arg(long)]
        leader: Option<String>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Keep the log in memory
        #[arg(long)]
        memory: bool,

        /// Abort proposal and sync rounds after this long (e.g. 5s)
        #[arg(long)]
        round_timeout: Option<String>,

        /// Skip the startup sync round
        #[arg(long)]
        no_sync: bool,

        /// Start an election after joining
        #[arg(long)]
        elect: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            servers,
            leader,
            db,
            memory,
            round_timeout,
            no_sync,
            elect,
        } => {
            let mut config = Config::load(config.as_deref())?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            // CLI has priority over file and environment
            let node = &mut config.node;
            if let Some(id) = id {
                // a node started with only --id defaults to a one-member ensemble led by itself
                if node.servers == [node.id.clone()] {
                    node.servers = vec![id.clone()];
                }
                if node.leader == node.id {
                    node.leader = id.clone();
                }
                node.id = id;
            }
            if let Some(bind) = bind {
                node.bind_addr = bind.parse()?;
            }
            if !servers.is_empty() {
                node.servers = servers;
            }
            if let Some(leader) = leader {
                node.leader = leader;
            }
            if let Some(db) = db {
                node.db_path = db;
            }
            if memory {
                node.storage = StorageBackend::Memory;
            }
            if let Some(timeout) = round_timeout {
                let timeout = minizab::common::parse_duration(&timeout)?;
                node.round_timeout_ms = Some(minizab::common::duration_millis(timeout)?);
            }
            if no_sync {
                node.sync_on_startup = false;
            }
            if elect {
                node.elect_on_wakeup = true;
            }
            node.validate()?;

            let server = ZabServer::new(config.node);
            tokio::select! {
                res = server.serve() => res?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                }
            }
        }
    }

    Ok(())
}
