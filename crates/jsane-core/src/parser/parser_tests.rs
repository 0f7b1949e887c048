// Tests for the tree-sitter front end and arena conversion

#[cfg(test)]
mod tests {
    use crate::ast::{NodeKind, ToSource};
    use crate::errors::InstrumentError;
    use crate::parser::parse;

    #[test]
    fn test_parse_builds_parent_links() {
        let tree = parse("var x = a + b;", "t.js").unwrap();
        let root = tree.root();
        assert_eq!(tree.kind(root), NodeKind::Program);
        assert_eq!(tree.parent(root), None);

        let binary = tree
            .pre_order()
            .into_iter()
            .find(|id| tree.kind(*id) == NodeKind::BinaryExpression)
            .expect("binary expression");
        assert_eq!(tree.node(binary).operator.as_deref(), Some("+"));
        assert_eq!(tree.raw_source(binary), "a + b");

        let declarator = tree.parent(binary).unwrap();
        assert_eq!(tree.kind(declarator), NodeKind::VariableDeclarator);
        assert_eq!(tree.child_by_field(declarator, "value"), Some(binary));
        let name = tree.child_by_field(declarator, "name").unwrap();
        assert_eq!(tree.raw_source(name), "x");
    }

    #[test]
    fn test_parse_records_rows() {
        let tree = parse("f(1,\n  2);\ng();", "t.js").unwrap();
        let calls: Vec<_> = tree
            .pre_order()
            .into_iter()
            .filter(|id| tree.kind(*id) == NodeKind::CallExpression)
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(tree.node(calls[0]).start_row, 0);
        assert_eq!(tree.node(calls[0]).end_row, 1);
        assert_eq!(tree.node(calls[1]).line(), 3);
    }

    #[test]
    fn test_parse_marks_async_functions() {
        let tree = parse("async function f() {}\nfunction g() {}", "t.js").unwrap();
        let functions: Vec<_> = tree
            .pre_order()
            .into_iter()
            .filter(|id| tree.kind(*id) == NodeKind::FunctionDeclaration)
            .collect();
        assert_eq!(functions.len(), 2);
        assert!(tree.node(functions[0]).is_async);
        assert!(!tree.node(functions[1]).is_async);
    }

    #[test]
    fn test_parse_declaration_keywords() {
        let tree = parse("let a = 1; const b = 2; var c;", "t.js").unwrap();
        let keywords: Vec<_> = tree
            .pre_order()
            .into_iter()
            .filter_map(|id| tree.node(id).declaration_kind)
            .collect();
        assert_eq!(keywords, vec!["let", "const", "var"]);
    }

    #[test]
    fn test_unmodified_tree_renders_original_text() {
        let source = "#!/usr/bin/env node\n// comment\nfunction f(a) { return a * 2 }\n";
        let tree = parse(source, "t.js").unwrap();
        assert_eq!(tree.to_source(), source);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse("var ok = 1;\nvar = ;\n", "broken.js").unwrap_err();
        match err {
            InstrumentError::Parse { file, line, .. } => {
                assert_eq!(file, "broken.js");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
