//! Post-passes over the fully compiled tree.

use indexmap::IndexMap;
use markup5ever_rcdom::Handle;
use tracing::debug;

use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, DiagnosticTag};
use crate::dom;

// ═══════════════════════════════════════════════════════════════════════════════
// PORTALS
// ═══════════════════════════════════════════════════════════════════════════════

/// Moves every `portal="name"` element to the end of `<portal name>`, then
/// unwraps the portals.
pub fn resolve_portals(root: &Handle, url: &str, source: &str, sink: &dyn DiagnosticSink) {
    let publish = |tag: DiagnosticTag, message: String, snippet: &str| {
        sink.publish(
            Diagnostic::new(tag, url, message)
                .with_context(snippet)
                .located(source, snippet),
        );
    };

    let nodes = dom::descendants(root);
    let mut targets: IndexMap<String, Handle> = IndexMap::new();
    let mut portals = Vec::new();
    for node in nodes.iter().filter(|n| dom::is_tag(n, "portal")) {
        portals.push(node.clone());
        let name = dom::get_attr(node, "name")
            .map(|n| n.trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            publish(
                DiagnosticTag::MissingAttribute,
                "<portal> requires a name".to_string(),
                "<portal",
            );
        } else if targets.contains_key(&name) {
            publish(
                DiagnosticTag::DuplicatePortal,
                format!("portal '{}' is defined more than once", name),
                &name,
            );
        } else {
            targets.insert(name, node.clone());
        }
    }

    for node in nodes.iter().filter(|n| !dom::is_tag(n, "portal")) {
        let Some(name) = dom::remove_attr(node, "portal") else {
            continue;
        };
        let name = name.trim().to_string();
        match targets.get(&name) {
            Some(target) if dom::is_ancestor_or_self(node, target) => {
                debug!(portal = %name, "element contains its own portal");
            }
            Some(target) => dom::append(target, node),
            None => publish(
                DiagnosticTag::UnknownPortal,
                format!("no portal named '{}'", name),
                &name,
            ),
        }
    }

    for portal in portals {
        dom::unwrap(&portal);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARTIFACT STRIPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Removes compiler-only markup that survived compilation: slot
/// placeholders, imports, exports and fragment definitions. Remaining
/// `<raw>` wrappers are unwrapped.
pub fn strip_artifacts(root: &Handle, config: &CompilerConfig) {
    let mut raws = Vec::new();
    for node in dom::descendants(root) {
        if !dom::is_ancestor_or_self(root, &node) {
            continue;
        }
        if dom::is_comment(&node) {
            if config.strip_comments {
                dom::detach(&node);
            }
            continue;
        }
        match dom::tag_name(&node).as_deref() {
            Some("slot" | "import" | "export" | "fragment") => dom::detach(&node),
            Some("raw") => raws.push(node),
            _ => {}
        }
    }
    for raw in raws {
        dom::unwrap(&raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::parse::parse_document_source;

    #[test]
    fn test_portal_moves_in_document_order() {
        let doc = parse_document_source(
            "t.html",
            "<head-area><portal name=\"head\"><meta></portal></head-area><p portal=\"head\">1</p><i portal=\"head\">2</i>",
        );
        let sink = CollectingSink::new();
        resolve_portals(&doc.root, "t.html", "", &sink);
        assert!(sink.is_empty());
        assert_eq!(doc.html(), "<head-area><meta><p>1</p><i>2</i></head-area>");
    }

    #[test]
    fn test_portal_diagnostics() {
        let doc = parse_document_source(
            "t.html",
            "<portal name=\"a\"></portal><portal name=\"a\"></portal><portal></portal><b portal=\"zzz\">x</b>",
        );
        let sink = CollectingSink::new();
        resolve_portals(&doc.root, "t.html", "", &sink);
        assert_eq!(
            sink.tags(),
            vec![
                DiagnosticTag::DuplicatePortal,
                DiagnosticTag::MissingAttribute,
                DiagnosticTag::UnknownPortal,
            ]
        );
        assert_eq!(doc.html(), "<b>x</b>");
    }

    #[test]
    fn test_strip_artifacts() {
        let doc = parse_document_source(
            "t.html",
            "<import from=\"a.html\"></import><fragment name=\"f\"><b>x</b></fragment><slot></slot><raw><i>{{ keep }}</i></raw><!-- c -->",
        );
        strip_artifacts(&doc.root, &CompilerConfig::default());
        assert_eq!(doc.html(), "<i>{{ keep }}</i><!-- c -->");

        let config = CompilerConfig {
            strip_comments: true,
            ..CompilerConfig::default()
        };
        strip_artifacts(&doc.root, &config);
        assert_eq!(doc.html(), "<i>{{ keep }}</i>");
    }
}
