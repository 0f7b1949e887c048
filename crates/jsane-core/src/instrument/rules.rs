/*!
# Rewrite Rules

One rule per instrumented construct. Each rule claims a set of node kinds;
kinds are disjoint between rules so a node is rewritten at most once.

Operands are evaluated exactly once: anything with side effects is assigned
to a hoisted temporary inside a comma expression before it is read.

Temporaries are declared with `var` at the top of the function that hosts
them, or of the program. A function left uninstrumented because it touches
a suppressed line still gets that declaration when instrumented
expressions on its other lines need temporaries; it is the only change
made to such a function.
*/

use crate::ast::{js_string_literal, NodeId, NodeKind};
use crate::errors::{DiagnosticKind, InstrumentError};
use crate::scope::{Scope, ScopeKind};

use super::is_directive;
use super::rewriter::RewriteContext;
use super::stubs::{has_optional_chain, is_anonymous_function_value, is_plain_member, unwrap_parens, RETURN_SLOT};

/// Operators routed through `arithmeticCheck`.
pub const CHECKED_OPERATORS: [&str; 6] = ["+", "-", "*", "/", "|", "&"];

const LOGICAL_ASSIGNMENT_OPERATORS: [&str; 3] = ["&&", "||", "??"];

/// Core trait for rewrite rules
pub trait RewriteRule: Send + Sync {
    /// Human-readable name for this rule
    fn name(&self) -> &'static str;

    /// Whether this rule handles nodes of `kind`
    fn matches(&self, kind: NodeKind) -> bool;

    /// Rules that must still run on nodes touching suppressed lines
    fn applies_to_ignored(&self) -> bool {
        false
    }

    /// Attach replacement text to `node`. Returns whether anything changed.
    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError>;
}

pub fn default_rules() -> Vec<Box<dyn RewriteRule>> {
    vec![
        Box::new(StatementTerminator),
        Box::new(BinaryExpressionRule),
        Box::new(AssignmentRule),
        Box::new(CompoundAssignmentRule),
        Box::new(DeclaratorRule),
        Box::new(ReturnRule),
        Box::new(CallRule),
        Box::new(FunctionBodyRule),
    ]
}

fn is_terminable(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::ExpressionStatement
            | NodeKind::VariableDeclaration
            | NodeKind::LexicalDeclaration
            | NodeKind::ReturnStatement
            | NodeKind::Other("throw_statement")
            | NodeKind::Other("break_statement")
            | NodeKind::Other("continue_statement")
            | NodeKind::Other("debugger_statement")
    )
}

fn ends_with_semicolon(text: &str) -> bool {
    text.trim_end().ends_with(';')
}

/// Append a missing `;`. A statement following an unterminated suppressed
/// statement gets a leading `;` when it now starts with `(` or `[`.
fn terminate(context: &RewriteContext<'_>, node: NodeId, mut text: String) -> String {
    if !ends_with_semicolon(&text) {
        text.push(';');
    }
    if text.starts_with('(') || text.starts_with('[') {
        let tree = &*context.tree;
        let previous = tree.parent(node).and_then(|parent| {
            tree.significant_children(parent)
                .take_while(|sibling| *sibling != node)
                .last()
        });
        if let Some(previous) = previous {
            if is_terminable(tree.kind(previous)) && !ends_with_semicolon(&tree.source(previous)) {
                text.insert(0, ';');
            }
        }
    }
    text
}

/// Adds missing semicolons to statements.
pub struct StatementTerminator;

impl RewriteRule for StatementTerminator {
    fn name(&self) -> &'static str {
        "statement-terminator"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        is_terminable(kind) && kind != NodeKind::ReturnStatement
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let text = context.tree.source(node);
        let terminated = terminate(context, node, text.clone());
        if terminated == text {
            return Ok(false);
        }
        context.tree.update(node, terminated)?;
        Ok(true)
    }
}

/// `a op b` for checked operators, and `a in b`.
pub struct BinaryExpressionRule;

impl RewriteRule for BinaryExpressionRule {
    fn name(&self) -> &'static str {
        "binary-expression"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        kind == NodeKind::BinaryExpression
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let operator = context.tree.node(node).operator.clone().unwrap_or_default();
        let (Some(left), Some(right)) = (
            context.tree.child_by_field(node, "left"),
            context.tree.child_by_field(node, "right"),
        ) else {
            return Ok(false);
        };

        if operator == "in" {
            if context.tree.kind(left) == NodeKind::Other("private_property_identifier") {
                return Ok(false);
            }
            let text = format!(
                "{}({}, {})",
                context.hook_call("inOperatorProxy"),
                super::stubs::operand_text(&*context.tree, left),
                super::stubs::operand_text(&*context.tree, right),
            );
            context.tree.update(node, text)?;
            return Ok(true);
        }
        if !CHECKED_OPERATORS.contains(&operator.as_str()) {
            return Ok(false);
        }

        let lhs = context.operand_stub(left)?;
        let rhs = context.operand_stub(right)?;
        let left_temp = context.temporary(node);
        let right_temp = context.temporary(node);
        let lhs = context.held(left, lhs, left_temp.clone());
        let rhs = context.held(right, rhs, right_temp.clone());
        let location = context.location(node);

        let mut parts = lhs.preamble.clone();
        parts.extend(rhs.preamble.iter().cloned());
        parts.push(format!(
            "{}({left_temp} {operator} {right_temp}, {left_temp}, {right_temp}, {}, {location}, {}, {}, {}, {})",
            context.hook_call("arithmeticCheck"),
            js_string_literal(&operator),
            lhs.scope,
            lhs.slot,
            rhs.scope,
            rhs.slot,
        ));
        context.tree.update(node, format!("({})", parts.join(", ")))?;
        Ok(true)
    }
}

/// `lhs = rhs`
pub struct AssignmentRule;

impl RewriteRule for AssignmentRule {
    fn name(&self) -> &'static str {
        "assignment"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        kind == NodeKind::AssignmentExpression
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let (Some(left), Some(right)) = (
            context.tree.child_by_field(node, "left"),
            context.tree.child_by_field(node, "right"),
        ) else {
            return Ok(false);
        };
        let target_node = unwrap_parens(&*context.tree, left);
        if context.tree.kind(target_node) == NodeKind::Identifier
            && is_anonymous_function_value(&*context.tree, right)
        {
            // Keeps the engine's name inference for `f = function () {}`.
            return Ok(false);
        }
        let Some(target) = context.target_stub(left)? else {
            return Ok(false);
        };
        let Some(store) = target.store.clone() else {
            return Ok(false);
        };
        let value = context.operand_stub(right)?;
        let location = context.location(node);

        let mut parts = target.preamble.clone();
        parts.extend(value.preamble.iter().cloned());
        parts.push(format!(
            "{store} = {}({}, {}, {}, {}, {}, {location})",
            context.hook_call("assign"),
            value.value,
            target.scope,
            target.slot,
            value.scope,
            value.slot,
        ));
        context.tree.update(node, format!("({})", parts.join(", ")))?;
        Ok(true)
    }
}

/// `lhs op= rhs`: evaluate the reference once, read, evaluate the right-hand
/// side, combine, check, trace, store.
pub struct CompoundAssignmentRule;

impl RewriteRule for CompoundAssignmentRule {
    fn name(&self) -> &'static str {
        "compound-assignment"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        kind == NodeKind::AugmentedAssignmentExpression
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let token = context.tree.node(node).operator.clone().unwrap_or_default();
        let Some(operator) = token.strip_suffix('=').map(str::to_string) else {
            return Ok(false);
        };
        if LOGICAL_ASSIGNMENT_OPERATORS.contains(&operator.as_str()) {
            return Ok(false);
        }
        let (Some(left), Some(right)) = (
            context.tree.child_by_field(node, "left"),
            context.tree.child_by_field(node, "right"),
        ) else {
            return Ok(false);
        };
        let Some(target) = context.target_stub(left)? else {
            return Ok(false);
        };
        let Some(store) = target.store.clone() else {
            return Ok(false);
        };
        let value = context.operand_stub(right)?;
        let current = context.temporary(node);
        let operand = context.temporary(node);
        let value = context.held(right, value, operand.clone());
        let location = context.location(node);

        let mut parts = target.preamble.clone();
        parts.push(format!("{current} = {}", target.value));
        parts.extend(value.preamble.iter().cloned());

        let combined = if CHECKED_OPERATORS.contains(&operator.as_str()) {
            format!(
                "{}({current} {operator} {operand}, {current}, {operand}, {}, {location}, {}, {}, {}, {})",
                context.hook_call("arithmeticCheck"),
                js_string_literal(&operator),
                target.scope,
                target.slot,
                value.scope,
                value.slot,
            )
        } else {
            format!("{current} {operator} {operand}")
        };
        parts.push(format!(
            "{store} = {}({combined}, {}, {}, {}, {}, {location})",
            context.hook_call("assign"),
            target.scope,
            target.slot,
            value.scope,
            value.slot,
        ));
        context.tree.update(node, format!("({})", parts.join(", ")))?;
        Ok(true)
    }
}

/// `var x = init` traces the initial value into the declared variable.
pub struct DeclaratorRule;

impl RewriteRule for DeclaratorRule {
    fn name(&self) -> &'static str {
        "declarator"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        kind == NodeKind::VariableDeclarator
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let (Some(name), Some(init)) = (
            context.tree.child_by_field(node, "name"),
            context.tree.child_by_field(node, "value"),
        ) else {
            return Ok(false);
        };
        if context.tree.kind(name) != NodeKind::Identifier || is_anonymous_function_value(&*context.tree, init) {
            return Ok(false);
        }
        let (scope, slot) = context.identifier_key(name)?;
        let value = context.operand_stub(init)?;
        let location = context.location(node);
        let traced = value.sequence(format!(
            "{}({}, {scope}, {slot}, {}, {}, {location})",
            context.hook_call("assign"),
            value.value,
            value.scope,
            value.slot,
        ));
        let text = format!("{} = {traced}", context.tree.raw_source(name));
        context.tree.update(node, text)?;
        Ok(true)
    }
}

/// `return e` inside instrumented functions traces into the return slot.
pub struct ReturnRule;

impl RewriteRule for ReturnRule {
    fn name(&self) -> &'static str {
        "return"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        kind == NodeKind::ReturnStatement
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let instrumented = context
            .host_scope(node)
            .map(|scope| context.is_instrumented(scope))
            .unwrap_or(false);
        let argument = context.tree.significant_children(node).next();

        let text = match argument {
            Some(argument) if instrumented => {
                let value = context.operand_stub(argument)?;
                let location = context.location(node);
                let traced = value.sequence(format!(
                    "{}({}, null, {}, {}, {}, {location})",
                    context.hook_call("assign"),
                    value.value,
                    js_string_literal(RETURN_SLOT),
                    value.scope,
                    value.slot,
                ));
                format!("return {traced};")
            }
            _ => {
                let text = context.tree.source(node);
                if ends_with_semicolon(&text) {
                    return Ok(false);
                }
                text
            }
        };
        let text = terminate(context, node, text);
        context.tree.update(node, text)?;
        Ok(true)
    }
}

fn is_constant(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::String | NodeKind::Other("number" | "true" | "false" | "null" | "undefined" | "this")
    )
}

/// Arguments that run no code when evaluated.
fn is_inert(context: &RewriteContext<'_>, node: NodeId) -> bool {
    let kind = context.tree.kind(unwrap_parens(&*context.tree, node));
    kind == NodeKind::Identifier || is_constant(kind)
}

/// Calls go through `callCheck`, each argument traced into its slot.
///
/// Argument slots belong to the calling frame, so nothing may run between
/// the first slot being traced and the callee being entered. Arguments up
/// to the last one that runs code are read into temporaries first and
/// traced together once all of them are evaluated.
pub struct CallRule;

impl CallRule {
    fn unsupported(context: &mut RewriteContext<'_>, node: NodeId, kind: DiagnosticKind, what: &str) -> bool {
        let callee = context
            .tree
            .child_by_field(node, "function")
            .map(|callee| context.tree.raw_source(callee).to_string())
            .unwrap_or_default();
        context.diagnose(kind, node, format!("{what} '{callee}' left uninstrumented"));
        false
    }
}

impl RewriteRule for CallRule {
    fn name(&self) -> &'static str {
        "call"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        kind == NodeKind::CallExpression
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let (Some(callee), Some(arguments)) = (
            context.tree.child_by_field(node, "function"),
            context.tree.child_by_field(node, "arguments"),
        ) else {
            return Ok(false);
        };
        if has_optional_chain(&*context.tree, node) {
            return Ok(Self::unsupported(context, node, DiagnosticKind::UnsupportedCallee, "optional call of"));
        }
        if context.tree.kind(arguments) != NodeKind::Arguments {
            return Ok(Self::unsupported(context, node, DiagnosticKind::UnsupportedCallee, "tagged template"));
        }
        let argument_nodes: Vec<NodeId> = context.tree.significant_children(arguments).collect();
        if argument_nodes
            .iter()
            .any(|argument| context.tree.kind(*argument) == NodeKind::SpreadElement)
        {
            return Ok(Self::unsupported(context, node, DiagnosticKind::SpreadArguments, "call with spread arguments to"));
        }

        let target = unwrap_parens(&*context.tree, callee);
        let (preamble, function, this) = match context.tree.kind(target) {
            NodeKind::Identifier if context.tree.raw_source(target) == "eval" => {
                // Routing eval through callCheck would make it indirect.
                tracing::debug!(line = context.tree.node(node).line(), "direct eval left uninstrumented");
                return Ok(false);
            }
            NodeKind::Identifier | NodeKind::FunctionExpression => {
                (Vec::new(), context.tree.source(callee), "void 0".to_string())
            }
            NodeKind::MemberExpression | NodeKind::SubscriptExpression if is_plain_member(&*context.tree, target) => {
                let member = context.operand_stub(target)?;
                (member.preamble, member.value, member.scope)
            }
            _ => return Ok(Self::unsupported(context, node, DiagnosticKind::UnsupportedCallee, "call of")),
        };

        let held_until = argument_nodes
            .iter()
            .rposition(|argument| !is_inert(context, *argument));
        let mut held = Vec::new();
        let mut traced_arguments = Vec::with_capacity(argument_nodes.len());
        for (index, argument) in argument_nodes.into_iter().enumerate() {
            let mut value = context.operand_stub(argument)?;
            let is_held = held_until.is_some_and(|last| index <= last);
            if is_held && !is_constant(context.tree.kind(unwrap_parens(&*context.tree, argument))) {
                let temp = context.temporary(argument);
                value = context.held(argument, value, temp);
                held.append(&mut value.preamble);
            }
            let location = context.location(argument);
            traced_arguments.push(value.sequence(format!(
                "{}({}, null, {index}, {}, {}, {location})",
                context.hook_call("assign"),
                value.value,
                value.scope,
                value.slot,
            )));
        }
        let argument_list = if held.is_empty() {
            format!("[{}]", traced_arguments.join(", "))
        } else {
            format!("({}, [{}])", held.join(", "), traced_arguments.join(", "))
        };

        let call = format!(
            "{}({function}, {this}, {argument_list}, {}, {})",
            context.hook_call("callCheck"),
            js_string_literal(context.tree.raw_source(callee)),
            context.location(node),
        );
        let text = if preamble.is_empty() {
            call
        } else {
            let mut parts = preamble;
            parts.push(call);
            format!("({})", parts.join(", "))
        };
        context.tree.update(node, text)?;
        Ok(true)
    }
}

/// Function bodies announce frames with `enterCall`/`leaveCall` and host the
/// temporaries of the rewritten expressions inside them. Uninstrumented
/// bodies only receive the temporaries' declaration.
pub struct FunctionBodyRule;

impl FunctionBodyRule {
    /// End of the directive prologue (`"use strict";` and friends) of a
    /// body, or `start` when there is none.
    fn prologue_end(context: &RewriteContext<'_>, body: NodeId, start: usize) -> usize {
        let tree = &*context.tree;
        let mut end = start;
        for statement in tree.significant_children(body) {
            if tree.kind(statement) != NodeKind::ExpressionStatement || !is_directive(tree, statement) {
                break;
            }
            end = tree.node(statement).range.end;
        }
        end
    }

    /// Parameter names by position; destructured parameters have none.
    fn parameter_names(context: &RewriteContext<'_>, function: NodeId) -> Vec<Option<String>> {
        let tree = &*context.tree;
        let Some(parameters) = tree.child_by_field(function, "parameters") else {
            return Vec::new();
        };
        tree.significant_children(parameters)
            .map(|parameter| {
                let name = match tree.kind(parameter) {
                    NodeKind::Identifier => Some(parameter),
                    NodeKind::AssignmentPattern => tree
                        .child_by_field(parameter, "left")
                        .filter(|left| tree.kind(*left) == NodeKind::Identifier),
                    _ => None,
                };
                name.map(|name| tree.raw_source(name).to_string())
            })
            .collect()
    }

    /// `H.enterCall([params])`, plus the closed-over parameters when a
    /// nested function reads any.
    fn enter_call(context: &RewriteContext<'_>, function: NodeId, scope: &Scope) -> String {
        let names = Self::parameter_names(context, function);
        let listed: Vec<String> = names
            .iter()
            .map(|name| name.as_deref().map(js_string_literal).unwrap_or_else(|| "null".to_string()))
            .collect();
        let captured: Vec<String> = names
            .iter()
            .flatten()
            .filter(|name| {
                scope
                    .lookup(name)
                    .map(|variable| context.scopes.variable(variable).is_closed_over())
                    .unwrap_or(false)
            })
            .map(|name| js_string_literal(name))
            .collect();
        if captured.is_empty() {
            format!("{}([{}])", context.hook_call("enterCall"), listed.join(", "))
        } else {
            format!(
                "{}([{}], [{}])",
                context.hook_call("enterCall"),
                listed.join(", "),
                captured.join(", ")
            )
        }
    }
}

impl RewriteRule for FunctionBodyRule {
    fn name(&self) -> &'static str {
        "function-body"
    }

    fn matches(&self, kind: NodeKind) -> bool {
        matches!(kind, NodeKind::FunctionDeclaration | NodeKind::FunctionExpression)
    }

    fn applies_to_ignored(&self) -> bool {
        true
    }

    fn rewrite(&self, context: &mut RewriteContext<'_>, node: NodeId) -> Result<bool, InstrumentError> {
        let scopes = context.scopes;
        let Some(scope) = scopes.scope_of(node) else {
            return Err(InstrumentError::contract(format!(
                "function at line {} has no scope",
                context.tree.node(node).line()
            )));
        };
        if scope.kind != ScopeKind::Function {
            return Ok(false);
        }
        let Some(body) = context.tree.child_by_field(node, "body") else {
            return Err(InstrumentError::contract("function without body"));
        };

        let instrumented = context.is_instrumented(scope.id);
        let temporaries = context.take_temporaries(Some(scope.id));
        if !instrumented && temporaries.is_empty() {
            return Ok(false);
        }

        let range = context.tree.node(body).range.clone();
        let prologue_end = Self::prologue_end(context, body, range.start + 1);
        let mut prologue = context.tree.source_range(body, range.start + 1, prologue_end);
        if prologue_end > range.start + 1 && !ends_with_semicolon(&prologue) {
            prologue.push(';');
        }
        let rest = context.tree.source_range(body, prologue_end, range.end - 1);

        let text = if instrumented {
            let enter = Self::enter_call(context, node, scope);
            let header = match context.trace_variable(scope.id) {
                Some(trace_id) => {
                    let mut declarations = vec![format!("{trace_id} = {enter}")];
                    declarations.extend(temporaries);
                    format!(" var {};", declarations.join(", "))
                }
                None if temporaries.is_empty() => format!(" {enter};"),
                None => format!(" {enter}; var {};", temporaries.join(", ")),
            };
            format!(
                "{{{prologue}{header} try {{{rest}}} finally {{ {}(); }}}}",
                context.hook_call("leaveCall")
            )
        } else {
            format!("{{{prologue} var {};{rest}}}", temporaries.join(", "))
        };
        context.tree.update(body, text)?;
        Ok(true)
    }
}
