//! Run command - execute Luma source files

use anyhow::{bail, Context, Result};
use luma_runtime::{disassemble, Luma, LumaError};
use std::fs;
use std::path::Path;
use termcolor::{ColorChoice, StandardStream};

/// Run a Luma source file
///
/// Compiles and executes the file. If `json_output` is true, diagnostics
/// are printed as JSON lines instead of human-readable text.
pub fn run(file_path: &Path, json_output: bool) -> Result<()> {
    let source = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read source file: {}", file_path.display()))?;

    match Luma::new().eval(&source) {
        Ok(_) => Ok(()),
        Err(LumaError::Compile(diagnostics)) => {
            if json_output {
                for diag in &diagnostics {
                    println!("{}", diag.to_json_string()?);
                }
            } else {
                let mut stderr = StandardStream::stderr(ColorChoice::Auto);
                for diag in &diagnostics {
                    diag.render(&mut stderr)?;
                }
            }
            bail!("failed to compile {}", file_path.display())
        }
        Err(LumaError::Runtime(error)) => {
            bail!("runtime error: {}", error)
        }
    }
}

/// Print the compiled instruction listing for a source file
pub fn disasm(file_path: &Path) -> Result<()> {
    let source = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read source file: {}", file_path.display()))?;

    match Luma::new().compile(&source) {
        Ok((assembly, interns)) => {
            print!("{}", disassemble(&assembly, &interns));
            Ok(())
        }
        Err(diagnostics) => {
            let mut stderr = StandardStream::stderr(ColorChoice::Auto);
            for diag in &diagnostics {
                diag.render(&mut stderr)?;
            }
            bail!("failed to compile {}", file_path.display())
        }
    }
}
