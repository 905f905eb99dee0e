//! Runtime Supervisor - run a text-mode runtime under supervision.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use runtime_supervisor::config::{AdapterConfig, ConfigLoader};
use runtime_supervisor::pty::{display_command, resolve_command};
use runtime_supervisor::supervisor::Adapter;

/// How often `run` checks whether the runtime is still up.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(
    name = "runtime-supervisor",
    about = "Keep a text-mode runtime alive on a PTY and record its events",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an adapter and attach this terminal to it.
    Run {
        /// Adapter id; defaults to the first configured adapter.
        adapter: Option<String>,
    },
    /// Print the command an adapter would launch.
    Resolve {
        /// Adapter id; defaults to the first configured adapter.
        adapter: Option<String>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_adapter_config(path: Option<PathBuf>, id: Option<&str>) -> Result<AdapterConfig, String> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = loader.load().map_err(|e| e.to_string())?;
    let source = loader.find_config_file().map_or_else(
        || "no config file found".to_string(),
        |p| p.display().to_string(),
    );
    config.adapter(id).cloned().ok_or_else(|| match id {
        Some(id) => format!("No adapter named '{id}' is configured in {source}"),
        None => format!(
            "No adapters configured (searched: {})",
            loader
                .search_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}

async fn run(config: AdapterConfig) -> Result<(), String> {
    let adapter = Adapter::new(config).map_err(|e| e.to_string())?;
    let mut output = adapter.subscribe_output();

    let status = adapter.start().await.map_err(|e| e.to_string())?;
    tracing::info!(
        adapter = %status.adapter_id,
        pid = ?status.pid,
        retries = status.retries,
        "Attached to runtime"
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping runtime");
                break;
            }
            chunk = output.recv() => match chunk {
                Ok(chunk) => {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(chunk.as_bytes());
                    let _ = stdout.flush();
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output display fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = adapter.send(&line) {
                        tracing::warn!(error = %e, "Failed to forward input");
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            _ = poll.tick() => {
                if !adapter.status().state.is_active() {
                    tracing::info!("Runtime is no longer running");
                    break;
                }
            }
        }
    }

    let status = adapter.stop().await;
    let json = serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn resolve(config: &AdapterConfig) -> Result<(), String> {
    let argv = resolve_command(config.override_env.as_deref(), &config.command_candidates)
        .map_err(|e| e.to_string())?;
    println!("{}", display_command(&argv));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { adapter } => match load_adapter_config(cli.config, adapter.as_deref()) {
            Ok(config) => run(config).await,
            Err(e) => Err(e),
        },
        Commands::Resolve { adapter } => {
            load_adapter_config(cli.config, adapter.as_deref()).and_then(|config| resolve(&config))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
