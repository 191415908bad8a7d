use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use boatman::cli;

mod commands;
use commands::{CheckpointCommands, Commands, WorktreeCommands};

#[derive(Parser)]
#[command(name = "boatman")]
#[command(about = "Autonomous software-change orchestrator - plan, execute, review, refactor, ship")]
#[command(version)]
struct Cli {
    /// Path to the repository (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Path to the config file (defaults to ~/.boatman.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let debug_env = std::env::var("BOATMAN_DEBUG").is_ok_and(|v| v == "1");
    let log_level = if cli.verbose || debug_env { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let work_dir = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let config_path = cli.config;

    match cli.command {
        Commands::Run {
            ticket,
            prompt,
            file,
            resume,
        } => {
            let code = cli::run::run_command(
                &work_dir,
                config_path.as_ref(),
                cli::run::RunArgs {
                    ticket,
                    prompt,
                    file,
                    resume,
                },
            )
            .await?;
            std::process::exit(code);
        }
        Commands::Worktree { command } => match command {
            WorktreeCommands::List => cli::worktree::list_command(&work_dir)?,
            WorktreeCommands::Clean => cli::worktree::clean_command(&work_dir)?,
        },
        Commands::Checkpoints { command } => match command {
            CheckpointCommands::List { task } => {
                cli::checkpoints::list_command(task.as_deref())?
            }
            CheckpointCommands::Cleanup { max_age_days } => {
                cli::checkpoints::cleanup_command(max_age_days)?
            }
        },
    }

    Ok(())
}
