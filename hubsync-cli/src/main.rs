//! hubsync CLI - track model repository downloads from the terminal.

mod commands;
mod error;
mod runner;
mod ui;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::download::DownloadArgs;

#[derive(Debug, Parser)]
#[command(name = "hubsync", version, about = "Download model repositories and follow their progress")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download one or more repositories
    Download(DownloadArgs),

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download(args) => commands::download::run(args),
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
