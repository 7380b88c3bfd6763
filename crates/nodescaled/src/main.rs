//! nodescaled — the nodescale daemon.
//!
//! Single binary that assembles all nodescale subsystems:
//! - Bootstrap provisioner (role, instance profile, launch template,
//!   zonal subnets, auth registration)
//! - State store (redb)
//! - Prometheus metric client
//! - Reconcile controller (work queue + worker pool)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! nodescaled run --config nodescale.toml --port 8443
//! nodescaled bootstrap --config nodescale.toml
//! nodescaled check-config --config nodescale.toml
//! ```

mod daemon;
mod seed;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nodescale_core::DaemonConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,nodescale=debug,nodescaled=debug";

#[derive(Parser)]
#[command(name = "nodescaled", about = "nodescale daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the cluster, then run the autoscaler and API until Ctrl-C.
    Run {
        /// Path to nodescale.toml.
        #[arg(long, default_value = "nodescale.toml")]
        config: PathBuf,

        /// Port to listen on; overrides `[api] port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state; overrides `[state] data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Run the bootstrap provisioner once and print the result as JSON.
    Bootstrap {
        #[arg(long, default_value = "nodescale.toml")]
        config: PathBuf,
    },

    /// Validate a config file and its seeded autoscalers.
    CheckConfig {
        #[arg(long, default_value = "nodescale.toml")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let config = DaemonConfig::from_file(&config)?;
            daemon::run(config, port, data_dir).await
        }
        Command::Bootstrap { config } => {
            let config = DaemonConfig::from_file(&config)?;
            let state = daemon::bootstrap_once(&config).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::CheckConfig { config } => {
            let config = DaemonConfig::from_file(&config)?;
            let settings = config.controller_settings()?;
            for autoscaler in &config.autoscalers {
                seed::spec_from_config(autoscaler, 0)?;
            }
            println!(
                "config ok: cluster {}, {} autoscaler(s), {} worker(s), resync every {:?}",
                config.cluster.name,
                config.autoscalers.len(),
                settings.workers,
                settings.resync_interval,
            );
            Ok(())
        }
    }
}
