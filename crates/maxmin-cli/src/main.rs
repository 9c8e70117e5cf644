use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "maxmin-cli", version, about = "Multi-period max/min/delta tracker")]
struct Cli {
    /// Config file (default: ~/.config/maxmin/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database file (default: ~/.config/maxmin/maxmin.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track readings from stdin (`<value> [cumulative]` per line)
    Run,
    /// Show persisted period values
    Status,
    /// Show period windows
    Periods {
        /// Reference instant, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// Drop one persisted extremum so it is not restored again
    Forget {
        /// Period (daily, weekly, monthly, yearly, all_time)
        period: maxmin_core::PeriodKind,
        /// Extremum (max or min)
        extremum: maxmin_core::Extremum,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = commands::Context::new(cli.config, cli.db);
    let result = match cli.command {
        Commands::Run => commands::run::run(&ctx),
        Commands::Status => commands::status::run(&ctx),
        Commands::Periods { at } => commands::periods::run(&ctx, at),
        Commands::Forget { period, extremum } => commands::forget::run(&ctx, period, extremum),
        Commands::Config { action } => commands::config::run(&ctx, action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
