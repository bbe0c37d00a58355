//! sweepline: submit, inspect and drive hyperparameter sweeps.
//!
//! ```text
//! sweepline submit sweep.json
//! sweepline serve --interval-ms 500
//! sweepline status
//! sweepline stop 3f2a9c1e
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sl_store::{default_store_root, ConfigStore, JsonFileStore};
use sl_sweep::SweepController;
use sl_types::{MountConfig, SweepConfig};

#[derive(Parser)]
#[command(name = "sweepline", about = "Hyperparameter sweep controller")]
struct Cli {
    /// Config store directory. Falls back to SWEEPLINE_STORE, then the
    /// platform data directory.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a sweep from a JSON configuration file.
    Submit {
        config: PathBuf,
    },

    /// Ask a sweep to stop.
    Stop {
        sweep_id: String,
    },

    /// Show one sweep in detail, or a summary of all sweeps.
    Status {
        sweep_id: Option<String>,
    },

    /// Register a mount that sweeps may reference.
    AddMount {
        #[arg(long)]
        name: String,

        #[arg(long)]
        source: String,

        #[arg(long)]
        mount_path: String,
    },

    /// Run the control loop until Ctrl-C.
    Serve {
        /// Milliseconds between control loop passes.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sl_sweep=debug,sweepline=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let root = cli
        .store
        .or_else(|| std::env::var_os("SWEEPLINE_STORE").map(PathBuf::from))
        .unwrap_or_else(default_store_root);
    let store = JsonFileStore::new(&root)
        .with_context(|| format!("opening config store at {}", root.display()))?;
    let mut controller = SweepController::new(store);

    match cli.command {
        Command::Submit { config: path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let mut config: SweepConfig = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            if config.sweep_id.is_empty() {
                config.sweep_id = SweepConfig::generate_id();
            }
            println!("{}", controller.run_sweep(config)?);
        }
        Command::Stop { sweep_id } => {
            println!("{}", controller.stop_sweep(&sweep_id)?);
        }
        Command::Status { sweep_id: Some(sweep_id) } => {
            let config = controller
                .get_sweep(&sweep_id)?
                .with_context(|| format!("no sweep named '{sweep_id}'"))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Status { sweep_id: None } => {
            for config in controller.list_sweeps()? {
                let best = config
                    .best_trial()
                    .and_then(|t| t.best_model_score)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<12} {:<10} {:>4}/{:<4} best={}",
                    config.sweep_id,
                    config.stage.to_string(),
                    config.trials_done,
                    config.n_trials,
                    best
                );
            }
        }
        Command::AddMount {
            name,
            source,
            mount_path,
        } => {
            controller.add_mount(MountConfig {
                name: name.clone(),
                source,
                mount_path,
            })?;
            println!("Added the mount '{name}'.");
        }
        Command::Serve { interval_ms } => serve(&mut controller, interval_ms).await?,
    }

    Ok(())
}

async fn serve<S: ConfigStore>(
    controller: &mut SweepController<S>,
    interval_ms: u64,
) -> anyhow::Result<()> {
    info!(interval_ms, "sweep controller serving");
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = controller.run() {
                    warn!(error = %e, "control loop pass failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
