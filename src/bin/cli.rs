//! CLI for ensemble operations

use clap::{Parser, Subcommand};
use minizab::ops::{describe_status, NodeClient};

#[derive(Parser)]
#[command(name = "minizab")]
#[command(about = "minizab ensemble CLI")]
#[command(version)]
struct Cli {
    /// Node to talk to (host:port or URL)
    #[arg(long, default_value = "127.0.0.1:7000")]
    node: String,

    /// Request timeout (e.g. 500ms, 30s)
    #[arg(long, default_value = "30s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a write through any member
    Put {
        /// Record payload
        #[arg(long)]
        payload: String,

        /// Ordering timestamp (RFC 3339, defaults to now)
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Show identity, role and round states
    Status {
        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },

    /// List committed records
    Records,

    /// Run a sync round on the node
    Sync,

    /// Start a leader election at the node
    Elect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        if e.is_retryable() {
            eprintln!("hint: the node may accept the request if retried");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli: Cli) -> minizab::Result<()> {
    let timeout = minizab::common::parse_duration(&cli.timeout)?;
    let client = NodeClient::new(&cli.node, timeout)?;

    match cli.command {
        Commands::Put { payload, timestamp } => {
            let res = client.put(payload, timestamp).await?;
            println!(
                "✓ Committed as zxid {} (leader {}, round {})",
                res.node_id, res.leader, res.round
            );
        }

        Commands::Status { json } => {
            let status = client.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", describe_status(&status));
            }
        }

        Commands::Records => {
            let records = client.records().await?;
            for record in &records {
                println!(
                    "{:>6}  {}  {}  (via {})",
                    record.node_id, record.timestamp, record.payload, record.origin
                );
            }
            println!("{} records", records.len());
        }

        Commands::Sync => {
            let report = client.sync().await?;
            println!("Sync report (round {}):", report.round);
            println!("  Highest id: {} -> {}", report.highest_before, report.highest_after);
            println!("  Received: {}", report.merged.received);
            println!("  Inserted: {}", report.merged.inserted);
            println!("  Skipped: {}", report.merged.skipped);
            println!("  Conflicts: {}", report.merged.conflicts);
            if !report.peers_failed.is_empty() {
                println!("  Unreachable: {}", report.peers_failed.join(", "));
            }
        }

        Commands::Elect => {
            let reply = client.elect().await?;
            match reply.candidate {
                Some(candidate) => println!("Election handed to {}", candidate),
                None => println!("{} is now leader", cli.node),
            }
        }
    }

    Ok(())
}
