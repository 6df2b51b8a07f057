mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::SelectorArgs;

#[derive(Parser)]
#[command(
    name = "syncforge",
    version,
    about = "Pull records from legacy sources into a local store, incrementally"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more mappings once
    Run {
        /// Path to sync YAML file
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        selector: SelectorArgs,
        /// Ignore watermarks and re-read everything
        #[arg(long)]
        full: bool,
        /// Records per load transaction (default: defaults.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Extra source filters as JSON, e.g. '{"STATUS": "A"}'
        #[arg(long)]
        filters: Option<String>,
    },
    /// List registered mappings and their watermarks
    List {
        /// Path to sync YAML file
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        target: Option<String>,
        /// Include inactive mappings
        #[arg(long)]
        inactive: bool,
    },
    /// Show recent runs from the run log
    Runs {
        /// Path to sync YAML file
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        mapping_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print the failed records of this run
        #[arg(long)]
        failed: Option<i64>,
    },
    /// Validate configuration and source connectivity
    Check {
        /// Path to sync YAML file
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        selector: SelectorArgs,
    },
    /// Run scheduled syncs until interrupted
    Serve {
        /// Path to sync YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, matches!(cli.command, Commands::Serve { .. }));

    match cli.command {
        Commands::Run {
            config,
            selector,
            full,
            batch_size,
            filters,
        } => commands::run::execute(&config, &selector, full, batch_size, filters.as_deref()).await,
        Commands::List {
            config,
            entity_type,
            source,
            target,
            inactive,
        } => commands::list::execute(&config, entity_type, source, target, inactive),
        Commands::Runs {
            config,
            mapping_id,
            limit,
            failed,
        } => commands::runs::execute(&config, mapping_id, limit, failed),
        Commands::Check { config, selector } => commands::check::execute(&config, &selector).await,
        Commands::Serve { config } => commands::serve::execute(&config).await,
    }
}
