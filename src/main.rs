//! SPOE offload agent.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                     SPOA AGENT                       │
//!                      │                                                      │
//!     Proxy (SPOE)     │  ┌─────────┐   ┌─────────┐   ┌────────────────────┐  │
//!     ─────────────────┼─▶│   net   │──▶│ session │──▶│    transaction     │  │
//!     hello / notify   │  │listener │   │handshake│   │    correlator      │  │
//!                      │  └─────────┘   │ streams │   └─────────┬──────────┘  │
//!                      │                └────┬────┘             │             │
//!     ack / disconnect │                     │                  ▼             │
//!     ◀────────────────┼─────────────────────┘      ┌────────────────────┐    │
//!                      │                            │ application        │    │
//!                      │                            │ registry (ArcSwap) │    │
//!                      │                            └─────────┬──────────┘    │
//!                      │                                      ▼               │
//!                      │                            ┌────────────────────┐    │
//!                      │                            │ engine (evaluator) │    │
//!                      │                            └────────────────────┘    │
//!                      │                                                      │
//!                      │  config · lifecycle (signals, reload) · observability│
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use spoa_agent::config::load_config;
use spoa_agent::lifecycle::startup;
use spoa_agent::observability::logging;

#[derive(Parser)]
#[command(name = "spoa-agent")]
#[command(version, about = "SPOE offload agent for request inspection", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SPOA_AGENT_CONFIG", default_value = "spoa-agent.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .map_err(|e| format!("{}: {}", cli.config.display(), e))?;

    if cli.validate {
        println!(
            "{}: OK ({} application(s))",
            cli.config.display(),
            config.applications.len()
        );
        return Ok(());
    }

    let logs = logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        bind = %config.bind,
        applications = config.applications.len(),
        "spoa-agent starting"
    );

    startup::run(&cli.config, config, logs).await?;
    Ok(())
}
