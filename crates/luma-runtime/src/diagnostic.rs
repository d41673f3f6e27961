//! Diagnostic system for front-end errors
//!
//! Lexical and syntactic errors flow through the unified Diagnostic type,
//! ensuring consistent formatting between the library and the CLI.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use termcolor::{Color, ColorSpec, WriteColor};

/// Severity level of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Fatal error that prevents execution
    Error,
    /// Warning that doesn't prevent execution
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic message (error or warning)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level
    pub level: DiagnosticLevel,
    /// Error code (e.g. "LM1001")
    pub code: String,
    /// Main diagnostic message
    pub message: String,
    /// Line number (1-based)
    pub line: usize,
    /// Byte span in the source
    pub span: Span,
    /// Source line string
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub snippet: String,
    /// Suggested fix (optional)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub help: Option<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic with code
    pub fn error(code: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            code: code.into(),
            message: message.into(),
            line: 1,
            span,
            snippet: String::new(),
            help: None,
        }
    }

    /// Set the source line number
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    /// Attach the source line the diagnostic points at
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Attach a suggested fix
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Serialize to a single JSON line
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Render to a (possibly colored) terminal stream
    ///
    /// Format mirrors the usual compiler shape:
    ///
    /// ```text
    /// error[LM1001]: Unexpected character '@' (line 3)
    ///   | let x = @;
    ///   = help: remove the character
    /// ```
    pub fn render(&self, out: &mut dyn WriteColor) -> std::io::Result<()> {
        let color = match self.level {
            DiagnosticLevel::Error => Color::Red,
            DiagnosticLevel::Warning => Color::Yellow,
        };
        out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
        write!(out, "{}[{}]", self.level, self.code)?;
        out.reset()?;
        writeln!(out, ": {} (line {})", self.message, self.line)?;
        if !self.snippet.is_empty() {
            writeln!(out, "  | {}", self.snippet)?;
        }
        if let Some(help) = &self.help {
            writeln!(out, "  = help: {}", help)?;
        }
        Ok(())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {} (line {})",
            self.level, self.code, self.message, self.line
        )
    }
}
