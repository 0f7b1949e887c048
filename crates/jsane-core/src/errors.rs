use std::fmt;

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Fatal instrumentation errors. Any of these aborts the file; no partial
/// output is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("{file}:{line}:{column}: parse error: {message}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{file}:{line}: unknown JSane directive '{verb}'")]
    UnknownDirective {
        file: String,
        line: usize,
        verb: String,
    },

    #[error("Contract violation: {message}")]
    Contract { message: String },

    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },
}

impl InstrumentError {
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnsupportedCallee,
    SpreadArguments,
    DuplicateToggle,
}

/// Recoverable instrumentation problem. The affected construct is emitted
/// unchanged and instrumentation continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, file: &str, line: usize, message: impl Into<String>) -> Self {
        let diagnostic = Self {
            kind,
            file: file.to_string(),
            line,
            message: message.into(),
        };
        tracing::warn!(file = %diagnostic.file, line, kind = ?kind, "{}", diagnostic.message);
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// Error types for JSane operations
#[derive(Error, Debug)]
pub enum JsaneError {
    #[error("Instrumentation error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for JSane operations
pub type Result<T> = std::result::Result<T, JsaneError>;
