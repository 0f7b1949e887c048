use thiserror::Error;

use super::value::Value;

/// Failures of the data-flow tracer. These mean instrumentation and tracer
/// disagree about the call stack and are never recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TracerError {
    #[error("trace chain desynchronized: {0}")]
    Desynchronized(String),

    #[error("trace stack underflow: leaveCall without a matching enterCall")]
    StackUnderflow,
}

/// Errors raised through the runtime hooks. From the instrumented
/// program's point of view each of these is a thrown exception.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// A check configured with error severity fired.
    #[error("jsane ERROR: {message}")]
    Check { code: String, message: String },

    /// Exception thrown by program code, passed through a hook unchanged.
    #[error("uncaught exception: {0}")]
    Thrown(Value),

    #[error(transparent)]
    Tracer(#[from] TracerError),

    #[error("TypeError: {callee} is not a function")]
    NotCallable { callee: String },

    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("the JSane runtime has been torn down")]
    TornDown,
}

impl RuntimeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Tracer(_))
    }
}
