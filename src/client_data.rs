//! Rewrites `import … from "build"` in client scripts into literal data.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::value::Value;

lazy_static! {
    static ref BUILD_IMPORT_RE: Regex = Regex::new(
        r#"import\s+(?:(?P<default>[A-Za-z_$][\w$]*)\s*,?\s*)?(?:\{(?P<named>[^}]*)\}|\*\s*as\s+(?P<namespace>[A-Za-z_$][\w$]*))?\s*from\s*["']build["']\s*;?"#
    )
    .unwrap();
    static ref LEFTOVER_RE: Regex = Regex::new(r#"from\s*["']build["']"#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineIssue {
    /// No public alias carries this name.
    Missing(String),
    /// The value has no JSON form (a function, a cycle).
    Unserializable { name: String, reason: String },
    /// A `build` import the rewriter could not read.
    Unparsed(String),
}

/// Resolves public names against the unit's build-script exports.
pub trait BuildExports {
    fn get(&self, exported: &str) -> Option<Value>;
    /// Every exported name with its value, in declaration order.
    fn all(&self) -> Vec<(String, Value)>;
}

pub fn has_build_import(script: &str) -> bool {
    LEFTOVER_RE.is_match(script)
}

/// Replaces every `build` import of `script` with `const` declarations.
pub fn inline_build_imports(script: &str, exports: &dyn BuildExports) -> (String, Vec<InlineIssue>) {
    let mut issues = Vec::new();
    let rewritten = BUILD_IMPORT_RE
        .replace_all(script, |caps: &Captures| {
            let mut lines = Vec::new();
            if let Some(local) = caps.name("default") {
                lines.push(declare(local.as_str(), "default", exports, &mut issues));
            }
            if let Some(named) = caps.name("named") {
                for spec in named.as_str().split(',') {
                    let spec = spec.trim();
                    if spec.is_empty() {
                        continue;
                    }
                    let (exported, local) = match spec.split_once(" as ") {
                        Some((exported, local)) => (exported.trim(), local.trim()),
                        None => (spec, spec),
                    };
                    lines.push(declare(local, exported, exports, &mut issues));
                }
            }
            if let Some(namespace) = caps.name("namespace") {
                let record: serde_json::Map<String, serde_json::Value> = exports
                    .all()
                    .into_iter()
                    .filter_map(|(name, value)| match value.to_json() {
                        Ok(Some(json)) => Some((name, json)),
                        Ok(None) => None,
                        Err(reason) => {
                            issues.push(InlineIssue::Unserializable { name, reason });
                            None
                        }
                    })
                    .collect();
                lines.push(format!(
                    "const {} = {};",
                    namespace.as_str(),
                    script_json(&serde_json::Value::Object(record))
                ));
            }
            lines.join("\n")
        })
        .into_owned();

    for leftover in LEFTOVER_RE.find_iter(&rewritten) {
        issues.push(InlineIssue::Unparsed(leftover.as_str().to_string()));
    }
    (rewritten, issues)
}

fn declare(
    local: &str,
    exported: &str,
    exports: &dyn BuildExports,
    issues: &mut Vec<InlineIssue>,
) -> String {
    let literal = match exports.get(exported) {
        None => {
            issues.push(InlineIssue::Missing(exported.to_string()));
            "undefined".to_string()
        }
        Some(value) => match value.to_json() {
            Ok(Some(json)) => script_json(&json),
            Ok(None) => "undefined".to_string(),
            Err(reason) => {
                issues.push(InlineIssue::Unserializable {
                    name: exported.to_string(),
                    reason,
                });
                "undefined".to_string()
            }
        },
    };
    format!("const {} = {};", local, literal)
}

/// JSON that is safe inside a `<script>` element.
fn script_json(json: &serde_json::Value) -> String {
    json.to_string().replace("</", "<\\/")
}
