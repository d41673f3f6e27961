//! Luma command-line interface

mod commands;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Run Luma programs
#[derive(Parser)]
#[command(name = "luma", version, about = "The Luma scripting language")]
struct Cli {
    /// Source file to run
    file: PathBuf,

    /// Print diagnostics as JSON lines
    #[arg(long)]
    json: bool,

    /// Print the compiled instruction listing instead of running
    #[arg(long)]
    disasm: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = if cli.disasm {
        commands::run::disasm(&cli.file)
    } else {
        commands::run::run(&cli.file, cli.json)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}
