//! Token-launch sniper - automated buyer/seller for newly created tokens
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Most freshly launched tokens go to zero (rug pulls, abandonment).
//! - MEV competition means other bots may outbid you.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use launch_sniper::cli::commands;
use launch_sniper::config::Config;

/// Token-launch sniper
#[derive(Parser)]
#[command(name = "launch-sniper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sniper
    Start {
        /// Detection only, no real trades
        #[arg(long)]
        dry_run: bool,
    },

    /// Manually sell a token position
    Sell {
        /// Token mint address
        token: String,

        /// Amount to sell as a percentage or fraction (default: all)
        #[arg(default_value = "100%")]
        amount: String,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check system health (RPC, aggregator)
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("launch_sniper=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Trading commands refuse to run without usable credentials
    let needs_keypair = matches!(
        cli.command,
        Commands::Start { dry_run: false } | Commands::Sell { .. }
    );
    if needs_keypair {
        if let Err(e) = keypair_checks() {
            error!("Startup checks failed: {}", e);
            std::process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(&config, dry_run).await,
        Commands::Sell { token, amount } => commands::sell(&config, &token, &amount).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Refuse to run with missing or world-readable keypairs
fn keypair_checks() -> Result<()> {
    let keypair_path = std::env::var("KEYPAIR_PATH")
        .map_err(|_| anyhow::anyhow!("KEYPAIR_PATH environment variable not set"))?;

    if !std::path::Path::new(&keypair_path).exists() {
        return Err(anyhow::anyhow!("Keypair file not found: {}", keypair_path));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(&keypair_path)
            .map_err(|e| anyhow::anyhow!("Cannot read keypair file {}: {}", keypair_path, e))?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(anyhow::anyhow!(
                "Keypair file {} has insecure permissions {:o}. \
                 Run 'chmod 600 {}' to fix.",
                keypair_path,
                mode & 0o777,
                keypair_path
            ));
        }
    }

    Ok(())
}
