//! Ground Truth Control - verify generated backgammon content from the command line
//!
//! Results go to stdout as JSON. Logs go to stderr, filtered by
//! `GROUNDTRUTH_LOG` (default `warn`).

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "groundtruthctl")]
#[command(about = "Check generated backgammon content against an analysis engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: discovered)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContentKind {
    Auto,
    Drills,
    Curriculum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VerifyMode {
    /// Every drill's declared answer
    Items,
    /// Claims extracted from the prose
    Claims,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Session,
    Rest,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify generated content against the project's engine
    Verify {
        #[arg(long)]
        project: String,

        /// JSON file with a drill series or curriculum
        #[arg(long)]
        content: PathBuf,

        #[arg(long, value_enum, default_value = "auto")]
        kind: ContentKind,

        #[arg(long, value_enum, default_value = "items")]
        mode: VerifyMode,

        #[arg(long, value_enum, default_value = "session")]
        transport: TransportArg,

        /// Also check the series has this many drills
        #[arg(long)]
        expect_drills: Option<usize>,
    },

    /// Verify a drill series, repair failures and verify again
    Repair {
        #[arg(long)]
        project: String,

        #[arg(long)]
        content: PathBuf,

        #[arg(long, value_enum, default_value = "session")]
        transport: TransportArg,
    },

    /// Probe the project's engine
    Health {
        #[arg(long)]
        project: String,

        #[arg(long, value_enum, default_value = "session")]
        transport: TransportArg,
    },

    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate content with the engine available as tools
    Generate {
        #[arg(long)]
        project: String,

        /// File holding the user prompt
        #[arg(long)]
        prompt: PathBuf,

        /// File holding the system prompt
        #[arg(long)]
        system: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove expired entries
    Sweep,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("GROUNDTRUTH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Verify {
            project,
            content,
            kind,
            mode,
            transport,
            expect_drills,
        } => commands::verify(&config, &project, &content, kind, mode, transport, expect_drills).await,
        Commands::Repair {
            project,
            content,
            transport,
        } => commands::repair(&config, &project, &content, transport).await,
        Commands::Health { project, transport } => commands::health(&config, &project, transport).await,
        Commands::Cache {
            action: CacheAction::Sweep,
        } => commands::cache_sweep(&config).await,
        Commands::Generate {
            project,
            prompt,
            system,
        } => commands::generate(&config, &project, &prompt, system.as_deref()).await,
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&e);
        std::process::exit(1);
    }
}
