//! Post-order expression rewriter.
//!
//! The tree is walked children-first; every node is offered to the rule set
//! and the first rule that matches its kind may attach replacement text.
//! Because children are finished before their parents, a parent rule reads
//! its operands' final text through [`SyntaxTree::source`].

use std::collections::{HashMap, HashSet};

use crate::ast::{js_string_literal, NodeId, NodeKind, SyntaxTree};
use crate::errors::{Diagnostic, DiagnosticKind, InstrumentError};
use crate::scope::{ScopeId, ScopeKind, ScopeTable};

use super::directives::IgnoredLines;
use super::names::NameGenerator;
use super::rules::{default_rules, RewriteRule};

/// State shared by the rewrite rules while a file is instrumented.
pub struct RewriteContext<'a> {
    pub tree: &'a mut SyntaxTree,
    pub scopes: &'a ScopeTable,
    pub ignored: &'a IgnoredLines,
    pub hook: &'a str,
    pub file_label: &'a str,
    names: NameGenerator,
    instrumented: HashSet<ScopeId>,
    trace_variables: HashMap<ScopeId, String>,
    temporaries: HashMap<Option<ScopeId>, Vec<String>>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> RewriteContext<'a> {
    pub fn new(
        tree: &'a mut SyntaxTree,
        scopes: &'a ScopeTable,
        ignored: &'a IgnoredLines,
        hook: &'a str,
        file_label: &'a str,
    ) -> Self {
        let mut names = NameGenerator::for_source(tree.original_source());
        let mut instrumented = HashSet::new();
        let mut trace_variables = HashMap::new();
        for scope in scopes.scopes() {
            if scope.kind != ScopeKind::Function {
                continue;
            }
            if tree.touches_rows(scope.node, |row| ignored.is_ignored(row)) {
                tracing::debug!(line = tree.node(scope.node).line(), "function left uninstrumented");
                continue;
            }
            instrumented.insert(scope.id);
            if scopes.has_closed_over_variables(scope.id) {
                trace_variables.insert(scope.id, names.trace_id());
            }
        }

        Self {
            tree,
            scopes,
            ignored,
            hook,
            file_label,
            names,
            instrumented,
            trace_variables,
            temporaries: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn is_instrumented(&self, scope: ScopeId) -> bool {
        self.instrumented.contains(&scope)
    }

    /// Per-call trace-id variable of an instrumented scope with closed-over
    /// variables.
    pub fn trace_variable(&self, scope: ScopeId) -> Option<&str> {
        self.trace_variables.get(&scope).map(String::as_str)
    }

    /// Innermost function scope around `node`; `None` is the program.
    pub fn host_scope(&self, node: NodeId) -> Option<ScopeId> {
        self.scopes.enclosing_scope(&*self.tree, node)
    }

    /// Allocate a temporary hoisted into the function (or program) that
    /// contains `node`.
    pub fn temporary(&mut self, node: NodeId) -> String {
        let host = self.host_scope(node);
        let name = self.names.temporary();
        self.temporaries.entry(host).or_default().push(name.clone());
        name
    }

    /// Temporaries hoisted into `host`, consuming the list.
    pub fn take_temporaries(&mut self, host: Option<ScopeId>) -> Vec<String> {
        self.temporaries.remove(&host).unwrap_or_default()
    }

    /// `H.method`
    pub fn hook_call(&self, method: &str) -> String {
        format!("{}.{}", self.hook, method)
    }

    /// Quoted `file:line` of a node.
    pub fn location(&self, node: NodeId) -> String {
        js_string_literal(&format!("{}:{}", self.file_label, self.tree.node(node).line()))
    }

    pub fn touches_ignored(&self, node: NodeId) -> bool {
        self.tree.touches_rows(node, |row| self.ignored.is_ignored(row))
    }

    pub fn diagnose(&mut self, kind: DiagnosticKind, node: NodeId, message: impl Into<String>) {
        let line = self.tree.node(node).line();
        self.diagnostics.push(Diagnostic::new(kind, self.file_label, line, message));
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Drives the rule set over the tree.
pub struct Rewriter<'a> {
    context: RewriteContext<'a>,
    rules: Vec<Box<dyn RewriteRule>>,
}

impl<'a> Rewriter<'a> {
    pub fn new(context: RewriteContext<'a>) -> Self {
        Self {
            context,
            rules: default_rules(),
        }
    }

    pub fn with_rules(context: RewriteContext<'a>, rules: Vec<Box<dyn RewriteRule>>) -> Self {
        Self { context, rules }
    }

    /// Rewrite every eligible node, children before parents. Opaque
    /// function-like nodes, classes and parameter lists are not entered.
    pub fn run(mut self) -> Result<RewriteContext<'a>, InstrumentError> {
        let order = {
            let tree: &SyntaxTree = &*self.context.tree;
            let scopes = self.context.scopes;
            tree.post_order(|id| is_opaque(tree, scopes, id))
        };

        for node in order {
            let kind = self.context.tree.kind(node);
            let Some(rule) = self.rules.iter().find(|rule| rule.matches(kind)) else {
                continue;
            };
            if !rule.applies_to_ignored() && self.context.touches_ignored(node) {
                continue;
            }
            if rule.rewrite(&mut self.context, node)? {
                tracing::trace!(rule = rule.name(), line = self.context.tree.node(node).line(), "rewrote node");
            }
        }
        Ok(self.context)
    }
}

fn is_opaque(tree: &SyntaxTree, scopes: &ScopeTable, node: NodeId) -> bool {
    match tree.kind(node) {
        // Default values run before the body's temporaries exist.
        NodeKind::Class | NodeKind::ClassDeclaration | NodeKind::FormalParameters => true,
        kind if kind.is_function_like() => scopes
            .scope_of(node)
            .map(|scope| scope.kind == ScopeKind::Opaque)
            .unwrap_or(true),
        _ => false,
    }
}
