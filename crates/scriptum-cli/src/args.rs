use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// The scriptum typesetter.
#[derive(Debug, Parser)]
#[command(name = "scriptum", version)]
pub struct CliArguments {
    #[command(subcommand)]
    pub command: Command,

    /// Set the level of logging verbosity: -v = info, -vv = debug,
    /// -vvv = trace.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbosity: u8,
}

/// What to do.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Typesets the books configured in a profile into a PDF.
    Generate(GenerateCommand),
}

/// Typesets the books configured in a profile into a PDF.
#[derive(Debug, Args)]
pub struct GenerateCommand {
    /// Path to the profile configuration file.
    pub profile: PathBuf,
}
