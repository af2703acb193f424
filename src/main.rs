use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use labprov::config::Settings;

mod cli;

use cli::config::ConfigCommand;
use cli::exec::ExecCommand;
use cli::fetch::FetchCommand;
use cli::status::StatusCommand;
use cli::validate::ValidateCommand;

#[derive(Parser)]
#[command(name = "labprov")]
#[command(about = "Compose lab machine configurations and run commands on provisioned targets", long_about = None)]
struct Cli {
    /// Configuration repository (overrides the settings file)
    #[arg(long, global = true)]
    repo_dir: Option<PathBuf>,

    /// Append all command output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Settings file (default: the platform config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Config(ConfigCommand),
    Validate(ValidateCommand),
    Exec(ExecCommand),
    Fetch(FetchCommand),
    Status(StatusCommand),
}

fn main() -> Result<()> {
    // Initialize logging with INFO level by default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(repo_dir) = cli.repo_dir {
        settings = settings.with_repo_dir(repo_dir);
    }
    if let Some(log_file) = cli.log_file {
        settings = settings.with_log_file(log_file);
    }

    match cli.command {
        Commands::Config(cmd) => cmd.execute(settings),
        Commands::Validate(cmd) => cmd.execute(settings),
        Commands::Exec(cmd) => cmd.execute(settings),
        Commands::Fetch(cmd) => cmd.execute(settings),
        Commands::Status(cmd) => cmd.execute(settings),
    }
}
