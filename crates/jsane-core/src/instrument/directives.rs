//! `// JSane: <verb>` suppression comments.
//!
//! A directive is a line comment at the end of a line. `off` suppresses every
//! following line until a matching `on`; `ignore` suppresses exactly the next
//! line. Directives take effect from the line after the comment.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Diagnostic, DiagnosticKind, InstrumentError};

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"//\s*JSane:\s*(\w+)\s*$").expect("directive pattern is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    On,
    Off,
    Ignore,
}

impl Directive {
    fn parse(verb: &str) -> Option<Self> {
        match verb {
            "on" => Some(Directive::On),
            "off" => Some(Directive::Off),
            "ignore" => Some(Directive::Ignore),
            _ => None,
        }
    }
}

/// Per-row suppression state of a source file (rows are zero based).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoredLines {
    rows: Vec<bool>,
}

impl IgnoredLines {
    /// Scan `source` for directives. Duplicate toggles are reported as
    /// diagnostics; an unknown verb aborts the file.
    pub fn scan(source: &str, file_label: &str) -> Result<(Self, Vec<Diagnostic>), InstrumentError> {
        let lines: Vec<&str> = source.split('\n').collect();
        let mut rows = vec![false; lines.len()];
        let mut diagnostics = Vec::new();
        let mut is_off = false;

        for (row, line) in lines.iter().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let mut next_ignored = is_off;
            if let Some(captures) = directive_pattern().captures(line) {
                let verb = &captures[1];
                match Directive::parse(verb) {
                    Some(Directive::Ignore) => {
                        if is_off {
                            diagnostics.push(Diagnostic::new(
                                DiagnosticKind::DuplicateToggle,
                                file_label,
                                row + 1,
                                "Duplicate \"JSane: ignore\" instruction",
                            ));
                        }
                        next_ignored = true;
                    }
                    Some(toggle) => {
                        let want_off = toggle == Directive::Off;
                        if want_off == is_off {
                            diagnostics.push(Diagnostic::new(
                                DiagnosticKind::DuplicateToggle,
                                file_label,
                                row + 1,
                                format!("Duplicate \"JSane: {verb}\" instruction"),
                            ));
                        }
                        is_off = want_off;
                        next_ignored = is_off;
                    }
                    None => {
                        return Err(InstrumentError::UnknownDirective {
                            file: file_label.to_string(),
                            line: row + 1,
                            verb: verb.to_string(),
                        });
                    }
                }
            }
            if let Some(next) = rows.get_mut(row + 1) {
                *next = next_ignored;
            }
        }

        Ok((Self { rows }, diagnostics))
    }

    pub fn is_ignored(&self, row: usize) -> bool {
        self.rows.get(row).copied().unwrap_or(false)
    }

    pub fn any(&self) -> bool {
        self.rows.iter().any(|ignored| *ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_and_on_bracket_a_region() {
        let source = "a();\n// JSane: off\nb();\nc();\n// JSane: on\nd();\n";
        let (ignored, diagnostics) = IgnoredLines::scan(source, "t.js").unwrap();
        assert!(diagnostics.is_empty());
        assert!(!ignored.is_ignored(0));
        assert!(!ignored.is_ignored(1));
        assert!(ignored.is_ignored(2));
        assert!(ignored.is_ignored(3));
        assert!(ignored.is_ignored(4));
        assert!(!ignored.is_ignored(5));
    }

    #[test]
    fn test_ignore_marks_exactly_next_line() {
        let source = "a(); // JSane: ignore\nb();\nc();\n";
        let (ignored, _) = IgnoredLines::scan(source, "t.js").unwrap();
        assert!(!ignored.is_ignored(0));
        assert!(ignored.is_ignored(1));
        assert!(!ignored.is_ignored(2));
    }

    #[test]
    fn test_duplicate_toggles_are_diagnostics() {
        let source = "// JSane: on\n// JSane: off\n// JSane: off\n// JSane: ignore\nx;\n";
        let (ignored, diagnostics) = IgnoredLines::scan(source, "t.js").unwrap();
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.iter().all(|d| d.kind == DiagnosticKind::DuplicateToggle));
        assert_eq!(diagnostics[0].line, 1);
        assert!(ignored.is_ignored(4));
    }

    #[test]
    fn test_unknown_verb_is_fatal() {
        let err = IgnoredLines::scan("x;\n// JSane: sometimes\n", "bad.js").unwrap_err();
        assert_eq!(
            err,
            InstrumentError::UnknownDirective {
                file: "bad.js".to_string(),
                line: 2,
                verb: "sometimes".to_string(),
            }
        );
    }

    #[test]
    fn test_directive_must_end_the_line() {
        let (ignored, _) = IgnoredLines::scan("// JSane: off because\nx;\n", "t.js").unwrap();
        assert!(!ignored.any());
    }
}
