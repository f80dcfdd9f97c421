use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{CheckConfigArgs, ReplayArgs};

#[derive(Parser)]
#[command(name = "orb-trader")]
#[command(about = "Opening-range breakout options trader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file, then print a summary
    CheckConfig(CheckConfigArgs),
    /// Replay a CSV of 5-second bars through the engine on the paper broker
    Replay(ReplayArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
        Commands::Replay(args) => commands::run_replay(args).await?,
    }

    Ok(())
}
