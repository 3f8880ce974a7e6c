//! MapForge command-line front end.
//!
//! Runs imports against an in-memory catalog: useful for validating
//! `.hmap` exports and rendering their tile trees to disk without a
//! database. A deployment wires [`mapforge::import::ImportService`] to its
//! own store instead.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use error::CliError;
use mapforge::config::ImportConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mapforge", version = mapforge::VERSION, about = "Map import and tile rendering core")]
struct Cli {
    /// INI settings file applied before flag overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a .hmap world export and render its tile tree.
    Import(commands::import::ImportArgs),
    /// Remove the disk artefacts of a failed or unwanted import.
    Cleanup(commands::cleanup::CleanupArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logging = match mapforge::logging::init_logging("logs", "mapforge.log") {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging unavailable: {}", e);
            None
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => ImportConfig::from_ini_file(path)?,
        None => ImportConfig::default(),
    };

    match cli.command {
        Command::Import(args) => commands::import::run(args, config).await,
        Command::Cleanup(args) => commands::cleanup::run(args, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_import_args_parse() {
        let cli = Cli::parse_from([
            "mapforge",
            "import",
            "world.hmap",
            "--tenant",
            "t1",
            "--merge",
        ]);
        match cli.command {
            Command::Import(args) => {
                assert_eq!(args.tenant, "t1");
                assert!(args.merge);
                assert!(args.storage_root.is_none());
            }
            _ => panic!("expected import command"),
        }
    }
}
