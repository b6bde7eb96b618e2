//! NavLayer CLI - command-line interface
//!
//! Offline archive tooling and area prefetch on top of the navlayer
//! library.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "navlayer", version, about = "Map imagery acquisition tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pack a directory of tile files into an offline archive
    Pack(commands::pack::PackArgs),
    /// List and verify the entries of an archive
    Inspect(commands::inspect::InspectArgs),
    /// Download the tiles covering an area into a cache root
    Fetch(commands::fetch::FetchArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Pack(args) => commands::pack::run(args),
        Command::Inspect(args) => commands::inspect::run(args),
        Command::Fetch(args) => commands::fetch::run(args),
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
