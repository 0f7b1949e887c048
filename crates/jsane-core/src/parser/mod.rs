//! JavaScript parsing through tree-sitter.
//!
//! The concrete tree is converted into the crate's arena [`SyntaxTree`]; only
//! named nodes are kept, with the few anonymous tokens the instrumenter needs
//! (operators, declaration keywords, `async`) folded into their parent.

#[cfg(test)]
mod parser_tests;

use tree_sitter::{Node, Tree};

use crate::ast::{NodeId, NodeKind, SyntaxNode, SyntaxTree};
use crate::errors::InstrumentError;

/// JavaScript parser backed by tree-sitter-javascript
pub struct JsParser {
    parser: tree_sitter::Parser,
}

impl JsParser {
    pub fn new() -> Result<Self, InstrumentError> {
        let mut parser = tree_sitter::Parser::new();
        let language = tree_sitter_javascript::LANGUAGE.into();
        parser
            .set_language(&language)
            .map_err(|e| InstrumentError::contract(format!("Failed to set JavaScript language: {e}")))?;

        Ok(Self { parser })
    }

    /// Parse `source` into an arena tree. Sources with syntax errors are
    /// rejected with the position of the first error.
    pub fn parse(&mut self, source: &str, file_label: &str) -> Result<SyntaxTree, InstrumentError> {
        let tree = self.parser.parse(source, None).ok_or_else(|| InstrumentError::Parse {
            file: file_label.to_string(),
            line: 1,
            column: 1,
            message: "parser produced no tree".to_string(),
        })?;

        if tree.root_node().has_error() {
            return Err(locate_error(&tree, file_label));
        }

        Ok(build_arena(&tree, source))
    }
}

/// Parse with a fresh parser.
pub fn parse(source: &str, file_label: &str) -> Result<SyntaxTree, InstrumentError> {
    JsParser::new()?.parse(source, file_label)
}

fn locate_error(tree: &Tree, file_label: &str) -> InstrumentError {
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let position = node.start_position();
            let message = if node.is_missing() {
                format!("missing '{}'", node.kind())
            } else {
                "unexpected token".to_string()
            };
            return InstrumentError::Parse {
                file: file_label.to_string(),
                line: position.row + 1,
                column: position.column + 1,
                message,
            };
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    InstrumentError::Parse {
        file: file_label.to_string(),
        line: 1,
        column: 1,
        message: "syntax error".to_string(),
    }
}

fn build_arena(tree: &Tree, source: &str) -> SyntaxTree {
    let mut nodes: Vec<SyntaxNode> = Vec::new();
    let mut stack: Vec<(Node, Option<NodeId>, Option<&'static str>)> = vec![(tree.root_node(), None, None)];

    while let Some((node, parent, field)) = stack.pop() {
        let id = NodeId(nodes.len());
        let mut entry = convert_node(node, source, parent, field);

        let mut named = Vec::new();
        let mut cursor = node.walk();
        if cursor.goto_first_child() {
            loop {
                let child = cursor.node();
                if child.is_named() {
                    named.push((child, cursor.field_name()));
                } else if child.kind() == "async" {
                    entry.is_async = true;
                }
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }

        nodes.push(entry);
        if let Some(parent) = parent {
            nodes[parent.0].children.push(id);
        }
        for (child, child_field) in named.into_iter().rev() {
            stack.push((child, Some(id), child_field));
        }
    }

    SyntaxTree::from_parts(source.to_string(), nodes)
}

fn convert_node(node: Node, source: &str, parent: Option<NodeId>, field: Option<&'static str>) -> SyntaxNode {
    let kind = NodeKind::from_grammar(node.kind());
    let operator = match kind {
        NodeKind::BinaryExpression | NodeKind::AugmentedAssignmentExpression => node
            .child_by_field_name("operator")
            .map(|op| source[op.byte_range()].to_string()),
        _ => None,
    };
    let declaration_kind = match kind {
        NodeKind::VariableDeclaration => Some("var"),
        NodeKind::LexicalDeclaration | NodeKind::ForInStatement => {
            node.child_by_field_name("kind").map(|keyword| keyword.kind())
        }
        _ => None,
    };

    SyntaxNode {
        kind,
        range: node.byte_range(),
        start_row: node.start_position().row,
        end_row: node.end_position().row,
        parent,
        children: Vec::new(),
        field,
        operator,
        declaration_kind,
        is_async: false,
        replacement: None,
    }
}
