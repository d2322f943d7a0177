//! Lens server CLI — the main entry point.
//!
//! Commands:
//! - `serve`    — Run the HTTP gateway (migrates on startup)
//! - `migrate`  — Run schema migrations and exit
//! - `version`  — Print version info
//!
//! Exit code is non-zero on configuration validation failure or fatal
//! initialization (unreachable database, bad listen address).

use clap::{Parser, Subcommand};
use lens_config::AppConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lens",
    about = "Lens — multi-tenant observability backend for LLM agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (environment variables still override)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the listen host (e.g. 0.0.0.0 for containers)
        #[arg(long)]
        host: Option<String>,
    },

    /// Run schema migrations against the configured store and exit
    Migrate,

    /// Show version info
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug,sqlx=info,hyper=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "fatal");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, host } => {
            let mut config = AppConfig::load(cli.config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            lens_gateway::serve(config)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))
        }
        Commands::Migrate => {
            let config = AppConfig::load(cli.config.as_deref())?;
            // connect() runs migrations; a second run is a no-op.
            let store = lens_store::connect(
                &config.database.url,
                lens_store::ConnectOptions {
                    min_connections: config.database.min_connections,
                    max_connections: config.database.max_connections,
                },
            )
            .await?;
            println!("migrations complete ({})", store.name());
            Ok(())
        }
        Commands::Version => {
            println!("lens {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
