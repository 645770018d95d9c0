mod args;

use std::process::ExitCode;

use clap::Parser;
use ecow::EcoString;
use scriptum_library::config::Config;
use scriptum_library::diag::StrResult;
use scriptum_library::fonts::FontBook;
use scriptum_pdf::PdfRenderer;
use tracing::metadata::LevelFilter;

use crate::args::{CliArguments, Command, GenerateCommand};

fn main() -> ExitCode {
    let args = CliArguments::parse();

    tracing_subscriber::fmt()
        .without_time()
        .with_max_level(level_filter(&args))
        .init();

    match dispatch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            print_error(&message);
            ExitCode::FAILURE
        }
    }
}

/// Execute the requested command.
fn dispatch(args: &CliArguments) -> StrResult<()> {
    match &args.command {
        Command::Generate(command) => generate(command),
    }
}

/// Typeset the configured books into the configured output file.
fn generate(command: &GenerateCommand) -> StrResult<()> {
    let config = Config::load(&command.profile)?;
    tracing::info!(digest = %config.digest, "configuration loaded");

    let fonts = FontBook::load(&config)?;
    let mut renderer = PdfRenderer::new(&fonts)?;
    scriptum_layout::typeset(config, fonts, &mut renderer)
}

fn level_filter(args: &CliArguments) -> LevelFilter {
    match args.verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Print an application-level error.
fn print_error(message: &EcoString) {
    eprintln!("error: {message}");
}
