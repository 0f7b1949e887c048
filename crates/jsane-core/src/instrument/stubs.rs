//! Trace stubs: how an operand is evaluated once and which trace key names
//! the place its value came from.

use crate::ast::{js_string_literal, NodeId, NodeKind, SyntaxTree};
use crate::errors::InstrumentError;
use crate::scope::Resolution;

use super::rewriter::RewriteContext;

/// Reserved slot name of a function's return value.
pub const RETURN_SLOT: &str = "$ ret";

/// Everything needed to splice an operand into a comma expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStub {
    /// Comma-expression parts that must run before `value` is read.
    pub preamble: Vec<String>,
    /// Expression reading the operand's value once the preamble ran.
    pub value: String,
    /// Assignable form of the operand, for member and identifier targets.
    pub store: Option<String>,
    pub scope: String,
    pub slot: String,
}

impl TraceStub {
    fn untraced(value: String) -> Self {
        Self {
            preamble: Vec::new(),
            value,
            store: None,
            scope: "null".to_string(),
            slot: "null".to_string(),
        }
    }

    /// Whether the operand is the result of a checked call, keyed by the
    /// caller's return entry.
    pub fn is_call_result(&self) -> bool {
        self.scope == "null" && self.slot == js_string_literal(RETURN_SLOT)
    }

    /// Wrap `expression` so it runs after the preamble.
    pub fn sequence(&self, expression: String) -> String {
        if self.preamble.is_empty() {
            expression
        } else {
            let mut parts = self.preamble.clone();
            parts.push(expression);
            format!("({})", parts.join(", "))
        }
    }
}

/// Strip redundant parentheses around references. Sequences keep theirs.
pub fn unwrap_parens(tree: &SyntaxTree, mut node: NodeId) -> NodeId {
    while tree.kind(node) == NodeKind::ParenthesizedExpression {
        let inner: Vec<NodeId> = tree.significant_children(node).collect();
        match inner.as_slice() {
            [only] if tree.kind(*only) != NodeKind::SequenceExpression => node = *only,
            _ => break,
        }
    }
    node
}

/// Text of a node safe to use as an assignment right-hand side or argument.
pub fn operand_text(tree: &SyntaxTree, node: NodeId) -> String {
    let text = tree.source(node);
    if tree.kind(node) == NodeKind::SequenceExpression {
        format!("({text})")
    } else {
        text
    }
}

/// Whether `node` is an anonymous function or class, whose `name` the
/// engine infers from a binding target.
pub fn is_anonymous_function_value(tree: &SyntaxTree, node: NodeId) -> bool {
    let node = unwrap_parens(tree, node);
    match tree.kind(node) {
        NodeKind::ArrowFunction => true,
        NodeKind::FunctionExpression | NodeKind::GeneratorFunction | NodeKind::Class => {
            tree.child_by_field(node, "name").is_none()
        }
        _ => false,
    }
}

/// Whether an optional chain (`a?.b`) short-circuits anywhere along the
/// member/call chain rooted at `node`.
pub fn has_optional_chain(tree: &SyntaxTree, node: NodeId) -> bool {
    let mut cursor = Some(node);
    while let Some(current) = cursor {
        let field = match tree.kind(current) {
            NodeKind::MemberExpression | NodeKind::SubscriptExpression => "object",
            NodeKind::CallExpression => "function",
            _ => return false,
        };
        if tree.child_by_field(current, "optional_chain").is_some() {
            return true;
        }
        cursor = tree.child_by_field(current, field);
    }
    false
}

/// Member accesses whose base and key can be hoisted into temporaries.
pub fn is_plain_member(tree: &SyntaxTree, node: NodeId) -> bool {
    let Some(object) = tree.child_by_field(node, "object") else {
        return false;
    };
    if tree.kind(object) == NodeKind::Super || has_optional_chain(tree, node) {
        return false;
    }
    match tree.kind(node) {
        NodeKind::MemberExpression => tree
            .child_by_field(node, "property")
            .map(|property| tree.kind(property) == NodeKind::PropertyIdentifier)
            .unwrap_or(false),
        NodeKind::SubscriptExpression => tree.child_by_field(node, "index").is_some(),
        _ => false,
    }
}

impl RewriteContext<'_> {
    /// Stub for an operand in value position.
    pub fn operand_stub(&mut self, node: NodeId) -> Result<TraceStub, InstrumentError> {
        let target = unwrap_parens(&*self.tree, node);
        match self.tree.kind(target) {
            NodeKind::Identifier => self.identifier_stub(target),
            NodeKind::MemberExpression | NodeKind::SubscriptExpression if is_plain_member(&*self.tree, target) => {
                self.member_stub(target)
            }
            // Only calls routed through callCheck leave a return entry behind.
            NodeKind::CallExpression if self.tree.node(target).is_rewritten() => Ok(TraceStub {
                preamble: Vec::new(),
                value: self.tree.source(target),
                store: None,
                scope: "null".to_string(),
                slot: js_string_literal(RETURN_SLOT),
            }),
            _ => Ok(TraceStub::untraced(operand_text(&*self.tree, node))),
        }
    }

    /// Read `stub` into `temp` and return a stub for the temporary. A call
    /// result is traced into `temp` on the spot, since the next checked
    /// call replaces the return entry it is keyed by.
    pub fn held(&self, node: NodeId, stub: TraceStub, temp: String) -> TraceStub {
        let traced_locally = self
            .host_scope(node)
            .map(|scope| self.is_instrumented(scope))
            .unwrap_or(true);
        let is_call_result = stub.is_call_result();
        let mut preamble = stub.preamble;
        if is_call_result && traced_locally {
            let slot = js_string_literal(&temp);
            preamble.push(format!(
                "{temp} = {}({}, null, {slot}, null, {}, {})",
                self.hook_call("assign"),
                stub.value,
                stub.slot,
                self.location(node),
            ));
            return TraceStub {
                preamble,
                value: temp,
                store: None,
                scope: "null".to_string(),
                slot,
            };
        }
        preamble.push(format!("{temp} = {}", stub.value));
        TraceStub {
            preamble,
            value: temp,
            store: None,
            scope: stub.scope,
            slot: stub.slot,
        }
    }

    /// Stub for an assignment target, or `None` for targets left unchanged.
    pub fn target_stub(&mut self, node: NodeId) -> Result<Option<TraceStub>, InstrumentError> {
        let target = unwrap_parens(&*self.tree, node);
        match self.tree.kind(target) {
            NodeKind::Identifier => self.identifier_stub(target).map(Some),
            NodeKind::MemberExpression | NodeKind::SubscriptExpression if is_plain_member(&*self.tree, target) => {
                self.member_stub(target).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Trace key of an identifier as `(scope, slot)` source text.
    pub fn identifier_key(&self, identifier: NodeId) -> Result<(String, String), InstrumentError> {
        let name = self.tree.raw_source(identifier);
        let slot = js_string_literal(name);
        let resolution = self.scopes.resolution(identifier).unwrap_or(Resolution::Global);
        let reference = match resolution {
            // The hook object stands for the global scope.
            Resolution::Global => return Ok((self.hook.to_string(), slot)),
            Resolution::Variable(reference) => reference,
        };
        let variable = self.scopes.variable(reference.variable);
        if !self.is_instrumented(variable.scope) {
            return Ok(("null".to_string(), "null".to_string()));
        }
        // A closed-over variable is keyed by its frame's trace id from every
        // scope, its own included, so readers in nested functions find it.
        if !variable.is_closed_over() {
            return Ok(("null".to_string(), slot));
        }
        match self.trace_variable(variable.scope) {
            Some(trace_id) => Ok((trace_id.to_string(), slot)),
            None => Err(InstrumentError::contract(format!(
                "closed-over variable '{name}' has no trace id variable"
            ))),
        }
    }

    fn identifier_stub(&mut self, identifier: NodeId) -> Result<TraceStub, InstrumentError> {
        let (scope, slot) = self.identifier_key(identifier)?;
        let name = self.tree.raw_source(identifier).to_string();
        Ok(TraceStub {
            preamble: Vec::new(),
            value: name.clone(),
            store: Some(name),
            scope,
            slot,
        })
    }

    fn member_stub(&mut self, member: NodeId) -> Result<TraceStub, InstrumentError> {
        let object = self
            .tree
            .child_by_field(member, "object")
            .ok_or_else(|| InstrumentError::contract("member expression without object"))?;
        let key = match self.tree.kind(member) {
            NodeKind::MemberExpression => {
                let property = self
                    .tree
                    .child_by_field(member, "property")
                    .ok_or_else(|| InstrumentError::contract("member expression without property"))?;
                js_string_literal(self.tree.raw_source(property))
            }
            _ => {
                let index = self
                    .tree
                    .child_by_field(member, "index")
                    .ok_or_else(|| InstrumentError::contract("subscript expression without index"))?;
                operand_text(&*self.tree, index)
            }
        };

        let base = self.temporary(member);
        let property = self.temporary(member);
        let access = format!("{base}[{property}]");
        Ok(TraceStub {
            preamble: vec![
                format!("{base} = {}", self.tree.source(object)),
                format!("{property} = {key}"),
            ],
            value: access.clone(),
            store: Some(access),
            scope: base,
            slot: property,
        })
    }
}
