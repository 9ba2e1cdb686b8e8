use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "overstim", version, about = "Overstim Guard CLI")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether calm mode is active
    Status(commands::status::StatusArgs),
    /// Calm period schedule
    Schedule {
        #[command(subcommand)]
        action: commands::schedule::ScheduleAction,
    },
    /// Per-site overrides
    Override {
        #[command(subcommand)]
        action: commands::overrides::OverrideAction,
    },
    /// Global rule selection
    Rules {
        #[command(subcommand)]
        action: commands::rules::RulesAction,
    },
    /// Raw settings access
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Run the clock and print every state change
    Watch(commands::watch::WatchArgs),
    /// Run the rules against a sample page
    Simulate(commands::simulate::SimulateArgs),
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Status(args) => commands::status::run(args),
        Commands::Schedule { action } => commands::schedule::run(action),
        Commands::Override { action } => commands::overrides::run(action),
        Commands::Rules { action } => commands::rules::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Watch(args) => commands::watch::run(args),
        Commands::Simulate(args) => commands::simulate::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
