use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

use commands::{migrate, new, GlobalOptions};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "examina-migrate")]
#[command(about = "Apply, roll back and inspect Examina schema changes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./migrate.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overrides config and environment
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations directory, overrides config and environment
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending changes
    Up {
        /// Stop at this change id (rolls back newer applied changes)
        #[arg(long)]
        to: Option<String>,
    },

    /// Roll back the most recently applied changes
    Down {
        /// Number of changes to roll back
        #[arg(short, long, default_value_t = 1)]
        steps: usize,
    },

    /// Show applied and pending changes
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Compare the live schema with the ledger
    Check,

    /// Create a new change file
    New {
        /// Change name, e.g. "add phone number"
        name: String,
    },

    /// Validate change files without connecting
    Validate,

    /// Remove a lock left behind by a crashed run
    Unlock,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let options = GlobalOptions {
        config: cli.config,
        database_url: cli.database_url,
        dir: cli.dir,
    };

    match cli.command {
        Commands::Up { to } => migrate::up(&options, to).await,
        Commands::Down { steps } => migrate::down(&options, steps).await,
        Commands::Status { format } => migrate::status(&options, format).await,
        Commands::Check => migrate::check(&options).await,
        Commands::New { name } => new::create(&options, &name),
        Commands::Validate => new::validate(&options),
        Commands::Unlock => migrate::unlock(&options).await,
    }
}
