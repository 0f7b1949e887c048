//! Arena syntax tree for JavaScript sources.
//!
//! The parser produces an immutable concrete tree; instrumentation needs parent
//! links and per-node replacement text, so every named node is copied into a
//! flat arena addressed by [`NodeId`]. Rendering a node splices the rendered
//! text of its children into the original source slice (see [`source_gen`]).

pub mod source_gen;


use std::ops::Range;

use crate::errors::InstrumentError;

pub use source_gen::{js_string_literal, ToSource};

/// Index of a node inside a [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node kinds the instrumenter distinguishes. Everything else is `Other` and
/// keeps the grammar's kind name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Program,
    HashBangLine,
    Comment,
    ExpressionStatement,
    VariableDeclaration,
    LexicalDeclaration,
    VariableDeclarator,
    ReturnStatement,
    StatementBlock,
    CatchClause,
    ForInStatement,
    FunctionDeclaration,
    FunctionExpression,
    GeneratorFunction,
    GeneratorFunctionDeclaration,
    ArrowFunction,
    MethodDefinition,
    Class,
    ClassDeclaration,
    FormalParameters,
    AssignmentPattern,
    RestPattern,
    ObjectPattern,
    ArrayPattern,
    PairPattern,
    BinaryExpression,
    AssignmentExpression,
    AugmentedAssignmentExpression,
    CallExpression,
    Arguments,
    MemberExpression,
    SubscriptExpression,
    ParenthesizedExpression,
    SequenceExpression,
    SpreadElement,
    Identifier,
    ShorthandPropertyIdentifier,
    ShorthandPropertyIdentifierPattern,
    PropertyIdentifier,
    String,
    Super,
    Other(&'static str),
}

impl NodeKind {
    pub fn from_grammar(kind: &'static str) -> Self {
        match kind {
            "program" => NodeKind::Program,
            "hash_bang_line" => NodeKind::HashBangLine,
            "comment" => NodeKind::Comment,
            "expression_statement" => NodeKind::ExpressionStatement,
            "variable_declaration" => NodeKind::VariableDeclaration,
            "lexical_declaration" => NodeKind::LexicalDeclaration,
            "variable_declarator" => NodeKind::VariableDeclarator,
            "return_statement" => NodeKind::ReturnStatement,
            "statement_block" => NodeKind::StatementBlock,
            "catch_clause" => NodeKind::CatchClause,
            "for_in_statement" => NodeKind::ForInStatement,
            "function_declaration" => NodeKind::FunctionDeclaration,
            "function_expression" | "function" => NodeKind::FunctionExpression,
            "generator_function" => NodeKind::GeneratorFunction,
            "generator_function_declaration" => NodeKind::GeneratorFunctionDeclaration,
            "arrow_function" => NodeKind::ArrowFunction,
            "method_definition" => NodeKind::MethodDefinition,
            "class" => NodeKind::Class,
            "class_declaration" => NodeKind::ClassDeclaration,
            "formal_parameters" => NodeKind::FormalParameters,
            "assignment_pattern" => NodeKind::AssignmentPattern,
            "rest_pattern" => NodeKind::RestPattern,
            "object_pattern" => NodeKind::ObjectPattern,
            "array_pattern" => NodeKind::ArrayPattern,
            "pair_pattern" => NodeKind::PairPattern,
            "binary_expression" => NodeKind::BinaryExpression,
            "assignment_expression" => NodeKind::AssignmentExpression,
            "augmented_assignment_expression" => NodeKind::AugmentedAssignmentExpression,
            "call_expression" => NodeKind::CallExpression,
            "arguments" => NodeKind::Arguments,
            "member_expression" => NodeKind::MemberExpression,
            "subscript_expression" => NodeKind::SubscriptExpression,
            "parenthesized_expression" => NodeKind::ParenthesizedExpression,
            "sequence_expression" => NodeKind::SequenceExpression,
            "spread_element" => NodeKind::SpreadElement,
            "identifier" => NodeKind::Identifier,
            "shorthand_property_identifier" => NodeKind::ShorthandPropertyIdentifier,
            "shorthand_property_identifier_pattern" => NodeKind::ShorthandPropertyIdentifierPattern,
            "property_identifier" => NodeKind::PropertyIdentifier,
            "string" => NodeKind::String,
            "super" => NodeKind::Super,
            other => NodeKind::Other(other),
        }
    }

    /// Nodes that introduce a function scope.
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            NodeKind::FunctionDeclaration
                | NodeKind::FunctionExpression
                | NodeKind::GeneratorFunction
                | NodeKind::GeneratorFunctionDeclaration
                | NodeKind::ArrowFunction
                | NodeKind::MethodDefinition
        )
    }

    /// Declarations whose name binds in the enclosing scope.
    pub fn is_declaration(self) -> bool {
        matches!(
            self,
            NodeKind::FunctionDeclaration | NodeKind::GeneratorFunctionDeclaration | NodeKind::ClassDeclaration
        )
    }
}

/// One named node of the parsed program.
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    /// Byte range into the original source.
    pub range: Range<usize>,
    /// Zero-based first and last source rows.
    pub start_row: usize,
    pub end_row: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Grammar field under which this node hangs off its parent.
    pub field: Option<&'static str>,
    /// Operator token for binary and augmented assignment expressions.
    pub operator: Option<String>,
    /// Declaration keyword (`var`, `let`, `const`) where the grammar exposes one.
    pub declaration_kind: Option<&'static str>,
    pub is_async: bool,
    pub(crate) replacement: Option<String>,
}

impl SyntaxNode {
    /// One-based line of the node's first token.
    pub fn line(&self) -> usize {
        self.start_row + 1
    }

    pub fn is_rewritten(&self) -> bool {
        self.replacement.is_some()
    }
}

/// Mutable arena view of a parsed program.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    source: String,
    nodes: Vec<SyntaxNode>,
    root: NodeId,
}

impl SyntaxTree {
    pub(crate) fn from_parts(source: String, nodes: Vec<SyntaxNode>) -> Self {
        Self {
            source,
            nodes,
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn original_source(&self) -> &str {
        &self.source
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Children excluding comments.
    pub fn significant_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |child| self.kind(*child) != NodeKind::Comment)
    }

    pub fn child_by_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|child| self.nodes[child.0].field == Some(field))
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// Source text of the node before any rewriting.
    pub fn raw_source(&self, id: NodeId) -> &str {
        &self.source[self.nodes[id.0].range.clone()]
    }

    /// Attach replacement text to a node. A node is rewritten at most once.
    pub fn update(&mut self, id: NodeId, text: String) -> Result<(), InstrumentError> {
        let node = &mut self.nodes[id.0];
        if node.replacement.is_some() {
            return Err(InstrumentError::contract(format!(
                "node {} ({:?}) rewritten twice",
                id.0, node.kind
            )));
        }
        node.replacement = Some(text);
        Ok(())
    }

    /// Whether any row spanned by the node satisfies `predicate`.
    pub fn touches_rows(&self, id: NodeId, predicate: impl Fn(usize) -> bool) -> bool {
        let node = &self.nodes[id.0];
        (node.start_row..=node.end_row).any(predicate)
    }

    /// Post-order (children before parents) listing of the tree. Subtrees
    /// rooted at nodes for which `skip` returns true are left out entirely.
    pub fn post_order(&self, skip: impl Fn(NodeId) -> bool) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if skip(self.root) {
            return order;
        }
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for child in self.children(id).iter().rev() {
                if !skip(*child) {
                    stack.push((*child, false));
                }
            }
        }
        order
    }

    /// All nodes in pre-order.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }
}

pub struct Ancestors<'a> {
    tree: &'a SyntaxTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}
