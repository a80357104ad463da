//! x402 endpoint observer.
//!
//! # Usage
//!
//! ```bash
//! # Observe every registered endpoint on the configured interval
//! w402-observer run
//!
//! # One run, restricted to one agent
//! w402-observer once --agent 9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM
//!
//! # Register an agent and import its endpoints
//! w402-observer discover <ADDRESS> https://agent.example
//!
//! # Configure logging level
//! RUST_LOG=debug w402-observer run
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `w402.toml`)
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use url::Url;
use w402::discovery::DiscoveryTarget;
use w402::registry::AgentStatus;

use w402_observer::config::ObserverConfig;
use w402_observer::quota::CallerIdentity;
use w402_observer::scheduler::summarize_backfill;
use w402_observer::shutdown::Shutdown;
use w402_observer::{ObservationScheduler, ObserverContext};

/// Continuously observes x402 pay-per-call endpoints.
#[derive(Parser, Debug)]
#[command(name = "w402-observer", version)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "CONFIG", default_value = "w402.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Observe on the configured interval until SIGTERM/SIGINT
    Run,
    /// Run once and print the report
    Once {
        /// Only observe this agent's endpoints
        #[arg(long)]
        agent: Option<String>,
        /// Charge the run to this caller's quota (wallet address or IP)
        #[arg(long)]
        caller: Option<CallerIdentity>,
    },
    /// Register an agent and import its endpoints
    Discover {
        /// Agent (payee) address
        address: String,
        /// Service base URL
        base_url: Url,
    },
    /// Discover every known agent and probe newly imported endpoints
    Backfill {
        /// Caller charged for the backfill (wallet address or IP)
        #[arg(long)]
        caller: CallerIdentity,
    },
    /// Record an owner claim for an agent
    Claim {
        /// Agent address
        address: String,
        /// Claiming owner
        #[arg(long)]
        owner: String,
    },
    /// Mark an agent's claim as verified
    Verify {
        /// Agent address
        address: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Observer failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ObserverConfig::load_from(&cli.config)?;
    tracing::info!(
        config = %cli.config.display(),
        agents = config.agents.len(),
        data_dir = ?config.store.data_dir,
        "Loaded configuration"
    );

    let scheduler = ObservationScheduler::new(ObserverContext::from_config(&config).await?);
    if !config.agents.is_empty() {
        let seeded = scheduler.seed(&config.agents).await?;
        tracing::info!(imported = seeded.imported, skipped = seeded.skipped, "Seeded agents");
    }

    match cli.command {
        Command::Run => {
            let shutdown = Shutdown::listen()?;
            scheduler.run_until_cancelled(shutdown.token()).await;
            shutdown.wait().await;
        }
        Command::Once { agent, caller } => {
            let report = match caller {
                Some(caller) => scheduler.request_observation(&caller, agent.as_deref()).await?,
                None => scheduler.run_scoped(agent.as_deref()).await?,
            };
            emit(&report)?;
        }
        Command::Discover { address, base_url } => {
            let target = DiscoveryTarget {
                agent_address: address,
                base_url,
            };
            let summary = scheduler.discover_agent(&target, "cli", None).await?;
            emit(&summary)?;
        }
        Command::Backfill { caller } => {
            let items = scheduler.backfill(&caller).await?.inspect(|item| {
                if let Err(e) = emit_line(item) {
                    tracing::warn!(error = %e, "Failed to print backfill item");
                }
            });
            let summary = summarize_backfill(items).await;
            emit(&summary)?;
        }
        Command::Claim { address, owner } => {
            let agent = scheduler
                .context()
                .registry
                .advance_agent_status(&address, AgentStatus::Claimed, Some(owner))
                .await?;
            emit(&agent)?;
        }
        Command::Verify { address } => {
            let agent = scheduler
                .context()
                .registry
                .advance_agent_status(&address, AgentStatus::Verified, None)
                .await?;
            emit(&agent)?;
        }
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn emit<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn emit_line<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
