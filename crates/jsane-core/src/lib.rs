//! # JSane Core
//!
//! JavaScript sanity instrumentation, including:
//! - Tree-sitter based parsing into an arena syntax tree
//! - Scope resolution with closure detection
//! - Source-to-source rewriting of arithmetic, assignments, calls and
//!   function bodies into runtime hook calls
//! - The runtime check library and its data-flow tracer
//!
//! Instrumented code reports latent coercion bugs such as `2 + null === 2`
//! or `[1, 2] + [3, 4]` at run time, with the history of the offending
//! value when it is known.

#![warn(clippy::all)]

pub mod ast;
pub mod config;
pub mod errors;
pub mod instrument;
pub mod parser;
pub mod runtime;
pub mod scope;

// Re-export commonly used types
pub use config::JsaneConfig;
pub use errors::{Diagnostic, DiagnosticKind, InstrumentError, JsaneError, Result};
pub use instrument::{instrument, InstrumentOptions, Instrumented, LinkageMode};
pub use runtime::{CheckConfig, CheckKind, CheckReport, Runtime, RuntimeError, Severity, Value};

/// JSane version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for JSane components. `RUST_LOG` directives apply on
/// top of the `jsane_core=info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "jsane_core=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    // A subscriber installed by the host wins. Events go to stderr so they
    // never mix with instrumented code written to stdout.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
