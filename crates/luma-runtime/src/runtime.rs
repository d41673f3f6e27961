//! The `Luma` facade
//!
//! Wires the pipeline together: source → tokens → AST → assembly → VM run,
//! with the host prelude installed. The CLI and the integration tests both
//! go through this type.

use crate::bytecode::Assembly;
use crate::compiler::Compiler;
use crate::diagnostic::Diagnostic;
use crate::intern::Interns;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::stdlib::{self, OutputWriter};
use crate::value::RuntimeError;
use crate::vm::Vm;
use thiserror::Error;

/// Everything that can stop a program
#[derive(Debug, Error)]
pub enum LumaError {
    /// Lexical or syntactic errors; execution never started
    #[error("compilation failed with {} diagnostic(s)", .0.len())]
    Compile(Vec<Diagnostic>),
    /// The program started and hit a runtime error
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// The Luma runtime
pub struct Luma {
    writer: OutputWriter,
}

impl Luma {
    /// A runtime whose `print` goes to stdout
    pub fn new() -> Self {
        Self {
            writer: stdlib::stdout_writer(),
        }
    }

    /// A runtime writing `print` output to the given writer
    pub fn with_writer(writer: OutputWriter) -> Self {
        Self { writer }
    }

    /// Compile source to an assembly and its intern table
    pub fn compile(&self, source: &str) -> Result<(Assembly, Interns), Vec<Diagnostic>> {
        let mut interns = Interns::new();
        let (tokens, diagnostics) = Lexer::new(source, &mut interns).tokenize();
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }
        let program = Parser::new(tokens).parse().map_err(|diag| vec![diag])?;
        Ok((Compiler::new().compile(&program), interns))
    }

    /// Compile and run a program
    ///
    /// Returns the finished VM so callers can inspect globals and heap
    /// state.
    pub fn eval(&self, source: &str) -> Result<Vm, LumaError> {
        let (assembly, interns) = self.compile(source).map_err(LumaError::Compile)?;
        let mut vm = Vm::new(assembly, interns);
        vm.set_output_writer(self.writer.clone());
        stdlib::install(&mut vm);
        vm.run()?;
        Ok(vm)
    }
}

impl Default for Luma {
    fn default() -> Self {
        Self::new()
    }
}
