// Source generation from the arena tree.
// A node renders as its replacement text when it has one, otherwise as its
// original slice with each child's rendering spliced in.

use super::{NodeId, SyntaxTree};

/// Trait for types that can generate their source code representation
pub trait ToSource {
    fn to_source(&self) -> String;
}

/// A node borrowed together with its tree.
#[derive(Clone, Copy)]
pub struct NodeSource<'a> {
    pub tree: &'a SyntaxTree,
    pub id: NodeId,
}

impl ToSource for NodeSource<'_> {
    fn to_source(&self) -> String {
        self.tree.source(self.id)
    }
}

impl ToSource for SyntaxTree {
    fn to_source(&self) -> String {
        let root = self.node(self.root());
        let original = self.original_source();
        let mut out = String::with_capacity(original.len());
        out.push_str(&original[..root.range.start]);
        self.render_into(self.root(), &mut out);
        out.push_str(&original[root.range.end..]);
        out
    }
}

impl SyntaxTree {
    /// Current (possibly rewritten) text of a node.
    pub fn source(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.render_into(id, &mut out);
        out
    }

    /// Current text of the byte window `start..end` of a node. Children lying
    /// inside the window are rendered; the window must not cut a child.
    pub fn source_range(&self, id: NodeId, start: usize, end: usize) -> String {
        let mut out = String::new();
        let mut cursor = start;
        for child in self.children(id) {
            let range = &self.node(*child).range;
            if range.start < start || range.end > end {
                continue;
            }
            out.push_str(&self.original_source()[cursor..range.start]);
            self.render_into(*child, &mut out);
            cursor = range.end;
        }
        out.push_str(&self.original_source()[cursor..end]);
        out
    }

    fn render_into(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        if let Some(text) = &node.replacement {
            out.push_str(text);
            return;
        }
        let mut cursor = node.range.start;
        for child in &node.children {
            let range = &self.node(*child).range;
            out.push_str(&self.original_source()[cursor..range.start]);
            self.render_into(*child, out);
            cursor = range.end;
        }
        out.push_str(&self.original_source()[cursor..node.range.end]);
    }
}

/// Quote text as a JavaScript string literal.
pub fn js_string_literal(text: &str) -> String {
    // JSON string syntax is a subset of JS string syntax except for the two
    // line separators, which older engines reject inside literals.
    serde_json::Value::String(text.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}
