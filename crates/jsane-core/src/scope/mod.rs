//! Scope resolution for JavaScript identifiers.
//!
//! Runs in two passes over the arena tree:
//!
//! 1. **Collection** creates one [`Scope`] per function-like node and records
//!    every name declared by it: parameters, `var`/`let`/`const` declarators,
//!    nested function and class declaration names, catch parameters and the
//!    own name of a named function expression. Declarations in nested blocks
//!    are hoisted to the function; nested functions are not entered.
//! 2. **Resolution** walks each identifier's ancestors. The first scope met is
//!    the identifier's own scope and the first scope declaring the name is the
//!    declaring scope. No declaring scope means the name is global. When the two
//!    differ the variable is marked closed over.
//!
//! The top level is the global pseudo-scope and has no [`Scope`] object.


use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ast::{NodeId, NodeKind, SyntaxTree};
use crate::errors::InstrumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(usize);

/// Whether the scope's function is a candidate for instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Plain synchronous `function` declaration or expression.
    Function,
    /// Arrow functions, methods, generators and async functions. Their
    /// contents are never rewritten.
    Opaque,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub node: NodeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    variables: IndexMap<String, VariableId>,
}

impl Scope {
    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.variables.get(name).copied()
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub scope: ScopeId,
    closed_over: bool,
}

impl Variable {
    /// True once any reference from a nested function has been resolved.
    pub fn is_closed_over(&self) -> bool {
        self.closed_over
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableReference {
    pub variable: VariableId,
    /// The identifier's own scope is the declaring scope.
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Global,
    Variable(VariableReference),
}

#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    variables: Vec<Variable>,
    by_node: HashMap<NodeId, ScopeId>,
    references: HashMap<NodeId, Resolution>,
    collected: bool,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run both passes over `tree`.
    pub fn analyze(tree: &SyntaxTree) -> Result<Self, InstrumentError> {
        let mut table = Self::new();
        table.collect(tree);
        table.resolve_all(tree)?;
        Ok(table)
    }

    /// Pass 1: create scopes and collect declarations.
    pub fn collect(&mut self, tree: &SyntaxTree) {
        for id in tree.pre_order() {
            let kind = tree.kind(id);
            if !kind.is_function_like() {
                continue;
            }
            let parent = self.enclosing_scope(tree, id);
            let scope_kind = match kind {
                NodeKind::FunctionDeclaration | NodeKind::FunctionExpression if !tree.node(id).is_async => {
                    ScopeKind::Function
                }
                _ => ScopeKind::Opaque,
            };
            let scope = ScopeId(self.scopes.len());
            self.scopes.push(Scope {
                id: scope,
                node: id,
                kind: scope_kind,
                parent,
                variables: IndexMap::new(),
            });
            self.by_node.insert(id, scope);
            self.collect_function(tree, id, scope);
        }
        self.collected = true;
        tracing::debug!(scopes = self.scopes.len(), variables = self.variables.len(), "collected scopes");
    }

    /// Pass 2: resolve every identifier reference in the tree.
    pub fn resolve_all(&mut self, tree: &SyntaxTree) -> Result<(), InstrumentError> {
        for id in tree.pre_order() {
            if matches!(
                tree.kind(id),
                NodeKind::Identifier | NodeKind::ShorthandPropertyIdentifier
            ) {
                self.resolve_identifier(tree, id)?;
            }
        }
        Ok(())
    }

    /// Resolve a single identifier node, marking the variable closed over when
    /// it is referenced from a nested scope.
    pub fn resolve_identifier(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<Resolution, InstrumentError> {
        if !self.collected {
            return Err(InstrumentError::contract(format!(
                "identifier '{}' resolved before scopes were collected",
                tree.raw_source(id)
            )));
        }
        if let Some(resolution) = self.references.get(&id) {
            return Ok(*resolution);
        }

        let name = tree.raw_source(id);
        let start = if is_declaration_name(tree, id) {
            tree.parent(id).and_then(|declaration| tree.parent(declaration))
        } else {
            tree.parent(id)
        };

        let mut own = None;
        let mut declaring = None;
        let mut cursor = start;
        while let Some(node) = cursor {
            if let Some(scope) = self.by_node.get(&node).copied() {
                own.get_or_insert(scope);
                if let Some(variable) = self.scopes[scope.0].lookup(name) {
                    declaring = Some((scope, variable));
                    break;
                }
            }
            cursor = tree.parent(node);
        }

        let resolution = match declaring {
            None => Resolution::Global,
            Some((scope, variable)) => {
                let is_local = own == Some(scope);
                if !is_local {
                    self.variables[variable.0].closed_over = true;
                }
                Resolution::Variable(VariableReference { variable, is_local })
            }
        };
        self.references.insert(id, resolution);
        Ok(resolution)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    /// Scope created for a function-like node.
    pub fn scope_of(&self, function: NodeId) -> Option<&Scope> {
        self.by_node.get(&function).map(|id| &self.scopes[id.0])
    }

    pub fn resolution(&self, identifier: NodeId) -> Option<Resolution> {
        self.references.get(&identifier).copied()
    }

    /// Innermost scope strictly enclosing `node`.
    pub fn enclosing_scope(&self, tree: &SyntaxTree, node: NodeId) -> Option<ScopeId> {
        tree.ancestors(node).find_map(|ancestor| self.by_node.get(&ancestor).copied())
    }

    pub fn has_closed_over_variables(&self, scope: ScopeId) -> bool {
        self.scopes[scope.0]
            .variables
            .values()
            .any(|variable| self.variables[variable.0].closed_over)
    }

    fn declare(&mut self, scope: ScopeId, name: &str) {
        if self.scopes[scope.0].variables.contains_key(name) {
            return;
        }
        let variable = VariableId(self.variables.len());
        self.variables.push(Variable {
            name: name.to_string(),
            scope,
            closed_over: false,
        });
        self.scopes[scope.0].variables.insert(name.to_string(), variable);
    }

    fn collect_function(&mut self, tree: &SyntaxTree, function: NodeId, scope: ScopeId) {
        let kind = tree.kind(function);
        if matches!(kind, NodeKind::FunctionExpression | NodeKind::GeneratorFunction) {
            if let Some(name) = tree.child_by_field(function, "name") {
                self.declare(scope, tree.raw_source(name));
            }
        }
        if kind != NodeKind::ArrowFunction {
            self.declare(scope, "arguments");
        }

        if let Some(parameters) = tree.child_by_field(function, "parameters") {
            for parameter in tree.significant_children(parameters).collect::<Vec<_>>() {
                self.declare_pattern(tree, scope, parameter);
            }
        }
        if let Some(parameter) = tree.child_by_field(function, "parameter") {
            self.declare_pattern(tree, scope, parameter);
        }

        let Some(body) = tree.child_by_field(function, "body") else {
            return;
        };
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            let node_kind = tree.kind(node);
            if node_kind.is_declaration() {
                if let Some(name) = tree.child_by_field(node, "name") {
                    self.declare(scope, tree.raw_source(name));
                }
                continue;
            }
            match node_kind {
                kind if kind.is_function_like() => continue,
                NodeKind::Class => continue,
                NodeKind::VariableDeclarator => {
                    if let Some(name) = tree.child_by_field(node, "name") {
                        self.declare_pattern(tree, scope, name);
                    }
                }
                NodeKind::CatchClause => {
                    if let Some(parameter) = tree.child_by_field(node, "parameter") {
                        self.declare_pattern(tree, scope, parameter);
                    }
                }
                NodeKind::ForInStatement if tree.node(node).declaration_kind.is_some() => {
                    if let Some(left) = tree.child_by_field(node, "left") {
                        self.declare_pattern(tree, scope, left);
                    }
                }
                _ => {}
            }
            stack.extend(tree.children(node).iter().copied());
        }
    }

    fn declare_pattern(&mut self, tree: &SyntaxTree, scope: ScopeId, pattern: NodeId) {
        match tree.kind(pattern) {
            NodeKind::Identifier | NodeKind::ShorthandPropertyIdentifierPattern => {
                self.declare(scope, tree.raw_source(pattern));
            }
            NodeKind::AssignmentPattern | NodeKind::Other("object_assignment_pattern") => {
                if let Some(left) = tree.child_by_field(pattern, "left") {
                    self.declare_pattern(tree, scope, left);
                }
            }
            NodeKind::PairPattern => {
                if let Some(value) = tree.child_by_field(pattern, "value") {
                    self.declare_pattern(tree, scope, value);
                }
            }
            NodeKind::RestPattern | NodeKind::ObjectPattern | NodeKind::ArrayPattern => {
                for child in tree.significant_children(pattern).collect::<Vec<_>>() {
                    self.declare_pattern(tree, scope, child);
                }
            }
            _ => {}
        }
    }
}

/// The `name` of a function, generator or class declaration. Such names bind
/// in the enclosing scope, so resolution starts above the declaration.
fn is_declaration_name(tree: &SyntaxTree, identifier: NodeId) -> bool {
    tree.node(identifier).field == Some("name")
        && tree
            .parent(identifier)
            .map(|parent| tree.kind(parent).is_declaration())
            .unwrap_or(false)
}
