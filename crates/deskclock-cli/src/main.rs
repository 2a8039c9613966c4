use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use deskclock_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "deskclock", version, about = "Deskclock alarm CLI")]
struct Cli {
    /// Treat this local time as "now" (YYYY-MM-DDTHH:MM[:SS])
    #[arg(long, global = true, value_parser = commands::parse_local_time)]
    at: Option<NaiveDateTime>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Alarm definitions
    Alarm {
        #[command(subcommand)]
        action: commands::alarm::AlarmAction,
    },
    /// Alarm instances and their state transitions
    Instance {
        #[command(subcommand)]
        action: commands::instance::InstanceAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Apply every scheduled transition that is due
    Tick,
    /// Re-derive all instances after a clock or timezone change
    Fix,
    /// Print the next upcoming alarm instance
    Next,
    /// Run the alarm service until interrupted
    Daemon,
}

fn init_logging() {
    let config = Config::load_or_default();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Alarm { action } => commands::alarm::run(action, cli.at),
        Commands::Instance { action } => commands::instance::run(action, cli.at),
        Commands::Config { action } => commands::config::run(action),
        Commands::Tick => commands::clock::tick(cli.at),
        Commands::Fix => commands::clock::fix(cli.at),
        Commands::Next => commands::clock::next(cli.at),
        Commands::Daemon => commands::clock::daemon(cli.at),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
