use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use agent_console::commands::{self, DetectArgs, NormalizeArgs, ReplayArgs, WatchArgs};
use agent_console::{ConsoleConfig, ConsoleError};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "agent-console")]
#[command(about = "Inspect agent transcripts and watch live console sessions")]
struct Cli {
    /// TOML settings with optional `[connection]`, `[noise]` and `[ingest]` tables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print which agent transcript format a JSONL file uses.
    Detect(DetectArgs),
    /// Convert a transcript into the unified message list (JSON).
    Normalize(NormalizeArgs),
    /// Load a stored session the way the history endpoints do.
    Replay(ReplayArgs),
    /// Connect to the console server and print events as JSON lines.
    Watch(WatchArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), ConsoleError> {
    let config = ConsoleConfig::load(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();
    match cli.command {
        Command::Detect(args) => commands::detect(&args, &config, &mut stdout).map(|_| ()),
        Command::Normalize(args) => commands::normalize(&args, &config, &mut stdout),
        Command::Replay(args) => commands::replay(&args, &config, &mut stdout).await,
        Command::Watch(args) => {
            let interrupted = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::warn!("cannot listen for ctrl-c: {err}");
                    std::future::pending::<()>().await;
                }
            };
            commands::watch_events(&args, &config, &mut stdout, interrupted).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
