//! Source-to-source instrumentation.
//!
//! [`instrument`] parses a file, resolves scopes, rewrites every arithmetic
//! operation, assignment, call and function body into calls of the runtime
//! hook object, and links the runtime into the output according to
//! [`LinkageMode`].

pub mod directives;
pub mod names;
pub mod rewriter;
pub mod rules;
pub mod stubs;


use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ast::{js_string_literal, NodeId, NodeKind, SyntaxTree, ToSource};
use crate::errors::{Diagnostic, InstrumentError};
use crate::parser::JsParser;
use crate::scope::ScopeTable;

pub use directives::IgnoredLines;
pub use rewriter::{RewriteContext, Rewriter};
pub use rules::RewriteRule;

/// How the instrumented file obtains the runtime hook object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkageMode {
    /// Prepend the runtime library source, guarded so it loads once.
    Embed,
    /// Prepend `var <hook> = require("<module>").runtime;`.
    #[default]
    Require,
    /// The hook variable is already in scope; prepend nothing.
    #[serde(alias = "none")]
    AssumePreexisting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentOptions {
    /// Name of the variable holding the runtime hook object.
    pub hook_variable_name: String,
    pub linkage: LinkageMode,
    /// Module required in [`LinkageMode::Require`].
    pub module_name: String,
    /// Runtime library source for [`LinkageMode::Embed`].
    #[serde(skip)]
    pub runtime_source: Option<String>,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            hook_variable_name: "__rt".to_string(),
            linkage: LinkageMode::Require,
            module_name: "jsane".to_string(),
            runtime_source: None,
        }
    }
}

impl InstrumentOptions {
    pub fn validate(&self) -> Result<(), InstrumentError> {
        static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
        let identifier = IDENTIFIER
            .get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid"));
        if !identifier.is_match(&self.hook_variable_name) {
            return Err(InstrumentError::invalid_options(format!(
                "hook variable name '{}' is not a JavaScript identifier",
                self.hook_variable_name
            )));
        }
        match self.linkage {
            LinkageMode::Require if self.module_name.trim().is_empty() => {
                Err(InstrumentError::invalid_options("require linkage needs a module name"))
            }
            LinkageMode::Embed if self.runtime_source.is_none() => {
                Err(InstrumentError::invalid_options("embed linkage needs the runtime source"))
            }
            _ => Ok(()),
        }
    }

    /// Text placed at the top of the instrumented program.
    fn linkage_prelude(&self) -> String {
        let hook = &self.hook_variable_name;
        match self.linkage {
            LinkageMode::AssumePreexisting => String::new(),
            LinkageMode::Require => format!(
                "var {hook} = require({}).runtime;",
                js_string_literal(&self.module_name)
            ),
            LinkageMode::Embed => format!(
                "var {hook} = (typeof {hook} !== \"undefined\") ? {hook} : (function (exports) {{\n{}\n;return exports.runtime || exports; }})({{}});\n",
                self.runtime_source.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// Result of instrumenting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumented {
    pub code: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Instrument `source`. `file_label` appears in locations and diagnostics.
pub fn instrument(source: &str, file_label: &str, options: &InstrumentOptions) -> Result<Instrumented, InstrumentError> {
    options.validate()?;

    let (ignored, mut diagnostics) = IgnoredLines::scan(source, file_label)?;
    let mut tree = JsParser::new()?.parse(source, file_label)?;
    let scopes = ScopeTable::analyze(&tree)?;

    let context = RewriteContext::new(&mut tree, &scopes, &ignored, &options.hook_variable_name, file_label);
    let mut context = Rewriter::new(context).run()?;

    let root = context.tree.root();
    let range = context.tree.node(root).range.clone();
    let (insert_at, after_directive) = program_insertion_point(&*context.tree, root);

    let prologue = context.tree.source_range(root, range.start, insert_at);
    let mut header = Vec::new();
    if after_directive && !prologue.trim_end().ends_with(';') {
        header.push(";".to_string());
    }
    let prelude = options.linkage_prelude();
    if !prelude.is_empty() {
        header.push(prelude);
    }
    let temporaries = context.take_temporaries(None);
    if !temporaries.is_empty() {
        header.push(format!("var {};", temporaries.join(", ")));
    }

    if !header.is_empty() {
        let mut text = prologue;
        if after_directive {
            text.push(' ');
        }
        text.push_str(&header.join(" "));
        let rest = context.tree.source_range(root, insert_at, range.end);
        if !text.ends_with('\n') && !rest.starts_with(char::is_whitespace) {
            text.push(' ');
        }
        text.push_str(&rest);
        context.tree.update(root, text)?;
    }

    diagnostics.extend(context.into_diagnostics());
    let code = tree.to_source();
    tracing::debug!(file = file_label, bytes = code.len(), diagnostics = diagnostics.len(), "instrumented");
    Ok(Instrumented { code, diagnostics })
}

/// Where program-level declarations go: after a `#!` line and after the
/// directive prologue. The flag tells whether the last item was a directive.
fn program_insertion_point(tree: &SyntaxTree, root: NodeId) -> (usize, bool) {
    let range = tree.node(root).range.clone();
    let mut end = range.start;
    let mut after_directive = false;
    for statement in tree.significant_children(root) {
        match tree.kind(statement) {
            NodeKind::HashBangLine => {
                end = tree.node(statement).range.end;
                let rest = &tree.original_source()[end..];
                let line_break = if rest.starts_with("\r\n") {
                    2
                } else if rest.starts_with('\n') {
                    1
                } else {
                    0
                };
                end += line_break;
                after_directive = false;
            }
            NodeKind::ExpressionStatement if is_directive(tree, statement) => {
                end = tree.node(statement).range.end;
                after_directive = true;
            }
            _ => break,
        }
    }
    (end.min(range.end), after_directive)
}

/// An expression statement consisting of a lone string literal.
pub(crate) fn is_directive(tree: &SyntaxTree, statement: NodeId) -> bool {
    let parts: Vec<NodeId> = tree.significant_children(statement).collect();
    matches!(parts.as_slice(), [only] if tree.kind(*only) == NodeKind::String)
}
