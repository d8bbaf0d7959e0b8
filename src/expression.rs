//! `{{ }}` marker discovery and substitution.
//!
//! A marker preceded by a backslash is escaped: it is never evaluated and
//! loses its backslash in the same pass.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::ScriptError;
use crate::lower::lower_expression;
use crate::script_ir as ir;
use crate::value::Value;

lazy_static! {
    static ref MARKER_RE: Regex = Regex::new(r"(?s)(\\)?\{\{(.*?)\}\}").unwrap();
}

pub fn contains_marker(text: &str) -> bool {
    text.contains("{{")
}

/// The expression source of a string that is exactly one unescaped marker.
pub fn full_marker(text: &str) -> Option<&str> {
    let caps = MARKER_RE.captures(text)?;
    let whole = caps.get(0)?;
    if caps.get(1).is_some() || whole.start() != 0 || whole.end() != text.len() {
        return None;
    }
    caps.get(2).map(|m| m.as_str().trim())
}

/// Result of substituting the markers of one string.
#[derive(Debug)]
pub enum Substitution {
    /// No marker resolved and nothing was unescaped.
    Unchanged,
    /// The string was a single marker: its native value.
    Value(Value),
    Text(String),
}

/// A marker whose expression failed to lower or evaluate.
#[derive(Debug, Clone)]
pub struct MarkerFailure {
    pub source: String,
    pub error: ScriptError,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Lowered expressions keyed by trimmed source, one per compile.
#[derive(Default)]
pub struct ExpressionCache {
    entries: RefCell<HashMap<String, Result<Rc<ir::Expr>, ScriptError>>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lower(&self, source: &str) -> Result<Rc<ir::Expr>, ScriptError> {
        let key = source.trim();
        if let Some(hit) = self.entries.borrow().get(key) {
            return hit.clone();
        }
        let lowered = lower_expression(key).map(Rc::new);
        self.entries
            .borrow_mut()
            .insert(key.to_string(), lowered.clone());
        lowered
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSTITUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Substitutes every marker of `text`.
///
/// `evaluate` receives the trimmed expression source. Failures are returned
/// alongside the result; a failed marker keeps its original text.
pub fn substitute<F>(text: &str, mut evaluate: F) -> (Substitution, Vec<MarkerFailure>)
where
    F: FnMut(&str) -> Result<Value, ScriptError>,
{
    let mut failures = Vec::new();

    if let Some(source) = full_marker(text) {
        return match evaluate(source) {
            Ok(value) => (Substitution::Value(value), failures),
            Err(error) => {
                failures.push(MarkerFailure {
                    source: source.to_string(),
                    error,
                });
                (Substitution::Unchanged, failures)
            }
        };
    }

    let mut changed = false;
    let out = MARKER_RE.replace_all(text, |caps: &Captures| {
        if caps.get(1).is_some() {
            changed = true;
            return format!("{{{{{}}}}}", &caps[2]);
        }
        let source = caps[2].trim();
        match evaluate(source) {
            Ok(value) => {
                changed = true;
                value.to_js_string()
            }
            Err(error) => {
                failures.push(MarkerFailure {
                    source: source.to_string(),
                    error,
                });
                caps[0].to_string()
            }
        }
    });

    if changed {
        (Substitution::Text(out.into_owned()), failures)
    } else {
        (Substitution::Unchanged, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(source: &str) -> Result<Value, ScriptError> {
        match source {
            "a" => Ok(Value::from(1.0)),
            "b" => Ok(Value::from("two")),
            "obj" => Ok(Value::empty_object()),
            _ => Err(ScriptError::Thrown(format!("ReferenceError: {} is not defined", source))),
        }
    }

    #[test]
    fn test_full_marker_detection() {
        assert_eq!(full_marker("{{ a }}"), Some("a"));
        assert_eq!(full_marker("{{a}}"), Some("a"));
        assert_eq!(full_marker(" {{ a }}"), None);
        assert_eq!(full_marker("{{ a }}{{ b }}"), None);
        assert_eq!(full_marker(r"\{{ a }}"), None);
    }

    #[test]
    fn test_single_marker_keeps_native_value() {
        let (result, failures) = substitute("{{ obj }}", numbers);
        assert!(failures.is_empty());
        assert!(matches!(result, Substitution::Value(Value::Object(_))));
    }

    #[test]
    fn test_failed_marker_keeps_text() {
        let (result, failures) = substitute("x {{ a }} {{ nope }} {{ b }}", numbers);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, "nope");
        match result {
            Substitution::Text(text) => assert_eq!(text, "x 1 {{ nope }} two"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_escaped_markers_are_not_evaluated() {
        let mut calls = 0;
        let (result, _) = substitute(r#"\{{ "x" }} and {{ a }}"#, |s| {
            calls += 1;
            numbers(s)
        });
        assert_eq!(calls, 1);
        match result {
            Substitution::Text(text) => assert_eq!(text, r#"{{ "x" }} and 1"#),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_multiline_marker() {
        let (result, _) = substitute("<{{\n a \n}}>", numbers);
        assert!(matches!(result, Substitution::Text(ref t) if t == "<1>"));
    }

    #[test]
    fn test_cache_reuses_lowering() {
        let cache = ExpressionCache::new();
        let first = cache.lower(" 1 + 2 ").unwrap();
        let second = cache.lower("1 + 2").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(cache.lower("1 +").is_err());
        assert_eq!(cache.len(), 2);
    }
}
