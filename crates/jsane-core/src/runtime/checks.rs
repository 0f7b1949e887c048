//! Check registry, severities and diagnostic delivery.
//!
//! Every runtime check has a stable index that appears in its message
//! (`W0`..`W6`, or `E<n>` when configured as an error).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Prefix of every message the runtime prints.
pub const MESSAGE_PREFIX: &str = "Jsane ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    /// Bad operand, non-numeric or non-finite result.
    #[serde(rename = "W0")]
    NonFiniteResult,
    /// Bad operand, clean-looking result.
    #[serde(rename = "W1")]
    HiddenBadOperand,
    /// Call of a value that is not callable.
    #[serde(rename = "W2", alias = "E2")]
    NotCallable,
    /// `array + array`.
    #[serde(rename = "W3")]
    ArrayConcatenation,
    /// Object without a proper string conversion stringified by `+`.
    #[serde(rename = "W4")]
    BadStringConversion,
    /// String operand of a numeric operator.
    #[serde(rename = "W5")]
    StringCoercion,
    /// More arguments than declared parameters.
    #[serde(rename = "W6")]
    TooManyArguments,
}

impl CheckKind {
    pub const ALL: [CheckKind; 7] = [
        CheckKind::NonFiniteResult,
        CheckKind::HiddenBadOperand,
        CheckKind::NotCallable,
        CheckKind::ArrayConcatenation,
        CheckKind::BadStringConversion,
        CheckKind::StringCoercion,
        CheckKind::TooManyArguments,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn default_severity(self) -> Severity {
        match self {
            CheckKind::NotCallable => Severity::Error,
            _ => Severity::Warn,
        }
    }

    pub fn category(self) -> Category {
        match self {
            CheckKind::NonFiniteResult | CheckKind::NotCallable | CheckKind::StringCoercion => Category::Earlier,
            CheckKind::HiddenBadOperand => Category::Hidden,
            CheckKind::ArrayConcatenation | CheckKind::BadStringConversion | CheckKind::TooManyArguments => {
                Category::Source
            }
        }
    }

    /// Message head. `{n}` refers to the n-th format argument.
    pub fn head(self) -> &'static str {
        match self {
            CheckKind::NonFiniteResult => {
                "An arithmetic expression of type '{3}' produced a non-numeric or non-finite result"
            }
            CheckKind::HiddenBadOperand => {
                "An arithmetic expression of type '{3}' on non-numeric or non-finite operands produced a finite result."
            }
            CheckKind::NotCallable => "Attempted to call a non-callable expression",
            CheckKind::ArrayConcatenation => "Adding arrays causes their string representations to be concatenated",
            CheckKind::BadStringConversion => {
                "String concatenation involves an object operand without a proper string conversion"
            }
            CheckKind::StringCoercion => "Operand of arithmetic expression is a string that gets auto-parsed as number",
            CheckKind::TooManyArguments => "Function called with too many arguments",
        }
    }

    pub fn detail(self) -> &'static str {
        match self {
            CheckKind::NonFiniteResult
            | CheckKind::HiddenBadOperand
            | CheckKind::BadStringConversion
            | CheckKind::StringCoercion => "Expression: '{1} {3} {2} => {0}'",
            CheckKind::NotCallable => "Function Expression: '{3}' is {0}",
            CheckKind::ArrayConcatenation => "Left array: '{1}', right array: '{2}'",
            CheckKind::TooManyArguments => "Expected {0} arguments but received {1}. Function: {2}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ignore,
    Warn,
    /// Report, then fail the hook with [`super::RuntimeError::Check`].
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Earlier,
    Source,
    Hidden,
}

impl Category {
    pub fn text(self) -> &'static str {
        match self {
            Category::Earlier => "This hints at a bug caused earlier.",
            Category::Source => "This may be a bug.",
            Category::Hidden => "This may be inadvertently hiding a bug.",
        }
    }
}

/// Per-check severity overrides, serialized as `{"W6": "ignore", ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckConfig {
    overrides: BTreeMap<CheckKind, Severity>,
}

impl CheckConfig {
    pub fn severity(&self, kind: CheckKind) -> Severity {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_severity())
    }

    pub fn set(&mut self, kind: CheckKind, severity: Severity) {
        self.overrides.insert(kind, severity);
    }

    pub fn with(mut self, kind: CheckKind, severity: Severity) -> Self {
        self.set(kind, severity);
        self
    }
}

/// Substitute `{i}` with `arguments[i]`, first occurrence only.
pub fn format_template(template: &str, arguments: &[String]) -> String {
    let mut text = template.to_string();
    for (index, argument) in arguments.iter().enumerate() {
        text = text.replacen(&format!("{{{index}}}"), argument, 1);
    }
    text
}

/// One fired check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub kind: CheckKind,
    pub severity: Severity,
    /// `file:line` of the hook call, when known.
    pub location: Option<String>,
    pub head: String,
    /// Full message without the [`MESSAGE_PREFIX`].
    pub message: String,
}

impl CheckReport {
    pub fn new(
        kind: CheckKind,
        severity: Severity,
        arguments: &[String],
        location: Option<String>,
        trace_lines: &[String],
    ) -> Self {
        let head = format_template(kind.head(), arguments);
        let letter = if severity == Severity::Error { 'E' } else { 'W' };
        let mut message = format!(
            "{letter}{}: {head}\n\t{}\n\tCategory: {}\n",
            kind.index(),
            format_template(kind.detail(), arguments),
            kind.category().text(),
        );
        if !trace_lines.is_empty() {
            message.push_str("\nTrace+\n\t");
            message.push_str(&trace_lines.join("\n\t"));
        }
        Self {
            kind,
            severity,
            location,
            head,
            message,
        }
    }

    /// `W1`, `E2`, ...
    pub fn code(&self) -> String {
        let letter = if self.severity == Severity::Error { 'E' } else { 'W' };
        format!("{letter}{}", self.kind.index())
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MESSAGE_PREFIX}{}", self.message)
    }
}

/// Receives every fired check.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, report: &CheckReport);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&CheckReport) + Send + Sync,
{
    fn report(&self, report: &CheckReport) {
        self(report)
    }
}

/// Prints errors to stderr and warnings to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl DiagnosticSink for ConsoleSink {
    fn report(&self, report: &CheckReport) {
        if report.severity == Severity::Error {
            eprintln!("{report}");
        } else {
            println!("{report}");
        }
    }
}

/// Keeps reports in memory, for embedding hosts and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<CheckReport>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CheckReport> {
        self.reports.lock().clone()
    }

    pub fn kinds(&self) -> Vec<CheckKind> {
        self.reports.lock().iter().map(|report| report.kind).collect()
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, report: &CheckReport) {
        self.reports.lock().push(report.clone());
    }
}
