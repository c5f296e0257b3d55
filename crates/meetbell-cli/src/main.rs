use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

#[derive(Parser)]
#[command(name = "meetbell", version, about = "Meeting reminders from your calendars")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder service until interrupted
    Run,
    /// Sync every enabled source once and schedule alerts
    Sync {
        /// Print the round as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect scheduled alerts
    Alerts {
        #[command(subcommand)]
        action: commands::alerts::AlertsAction,
    },
    /// Calendar source management
    Sources {
        #[command(subcommand)]
        action: commands::sources::SourcesAction,
    },
    /// Cached calendar events
    Events {
        #[command(subcommand)]
        action: commands::events::EventsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "meetbell=debug,meetbell_core=debug"
    } else {
        "meetbell=info,meetbell_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run => commands::run::run().await,
        Commands::Sync { json } => commands::sync::run(json).await,
        Commands::Alerts { action } => commands::alerts::run(action).await,
        Commands::Sources { action } => commands::sources::run(action).await,
        Commands::Events { action } => commands::events::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
