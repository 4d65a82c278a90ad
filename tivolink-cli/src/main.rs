//! TivoLink CLI - command-line interface
//!
//! Runs the TiVoConnect server and inspects share listings.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::list::{ListArgs, SortArg};
use commands::serve::ServeArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "tivolink")]
#[command(version = tivolink::VERSION)]
#[command(about = "Serve photos and videos to TiVo set-top boxes", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.tivolink/tivolink.conf)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the TiVoConnect server until Ctrl+C
    Serve {
        /// HTTP port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print a share listing through the same resolver the server uses
    List {
        /// Share name
        share: String,

        /// Sub-folder below the share root
        #[arg(short, long)]
        folder: Option<String>,

        /// Include files from sub-folders
        #[arg(short, long)]
        recurse: bool,

        /// Listing order
        #[arg(short, long, value_enum)]
        sort: Option<SortArg>,

        /// Seed for --sort random
        #[arg(long)]
        seed: Option<String>,

        /// Number of entries (negative counts page backwards)
        #[arg(short = 'n', long, allow_hyphen_values = true)]
        count: Option<i64>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let runner = CliRunner::new(cli.config.as_deref())?;
    match cli.command {
        Commands::Serve { port } => commands::serve::run(runner, ServeArgs { port }),
        Commands::List {
            share,
            folder,
            recurse,
            sort,
            seed,
            count,
        } => commands::list::run(
            runner,
            ListArgs {
                share,
                folder,
                recurse,
                sort,
                seed,
                count,
            },
        ),
    }
}
