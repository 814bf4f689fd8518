use anyhow::Result;
use beanport::log::init_logging;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for beanport::AppCommand {
    fn from(cmd: Commands) -> beanport::AppCommand {
        match cmd {
            Commands::List => beanport::AppCommand::List,
            Commands::Identify { path } => beanport::AppCommand::Identify { path },
            Commands::Extract { path, existing } => {
                beanport::AppCommand::Extract { path, existing }
            }
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured importers
    List,
    /// Show which importers claim a statement file
    Identify { path: PathBuf },
    /// Extract ledger entries from a statement file
    Extract {
        path: PathBuf,
        /// Ledger entries (JSON) used for holdings, prices and duplicates
        #[arg(short, long)]
        existing: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(cmd) => beanport::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
