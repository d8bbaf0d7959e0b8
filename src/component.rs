//! Component resolution.
//!
//! A call site `<alias ...>` is replaced by the compiled markup of the
//! document its `<import>` names. The callee is its own compilation unit:
//! fresh bindings, its own imports and exports, `props` built from the call
//! site's attributes. The call site's children are compiled in the caller's
//! unit and then fill the callee's `<slot>` placeholders.

use indexmap::IndexMap;
use markup5ever_rcdom::Handle;
use std::rc::Rc;
use tracing::debug;

use crate::classify::FragmentScope;
use crate::compile::{Compiler, Unit};
use crate::diagnostics::DiagnosticTag;
use crate::dom;
use crate::parse::{parse_document_source, ParsedDocument};
use crate::value::Value;

const ASSIGN_PREFIX: &str = "assign:";

/// The key of the unnamed slot group.
pub(crate) const DEFAULT_SLOT: &str = "";

// ═══════════════════════════════════════════════════════════════════════════════
// SLOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Detaches the children of `call_site`, grouped by their `slot`
/// attribute. Unlabeled children form the default group.
pub(crate) fn group_slot_content(call_site: &Handle) -> IndexMap<String, Vec<Handle>> {
    let mut groups: IndexMap<String, Vec<Handle>> = IndexMap::new();
    for child in dom::take_children(call_site) {
        let name = if dom::is_element(&child) {
            dom::remove_attr(&child, "slot").map(|s| s.trim().to_string())
        } else {
            None
        };
        groups
            .entry(name.unwrap_or_else(|| DEFAULT_SLOT.to_string()))
            .or_default()
            .push(child);
    }
    groups
}

/// Replaces each `<slot name=?>` under `root` with its group. A group is
/// used once; unmatched slots are removed and leftover groups dropped.
pub(crate) fn fill_slots(root: &Handle, mut groups: IndexMap<String, Vec<Handle>>) {
    let slots: Vec<Handle> = dom::descendants(root)
        .into_iter()
        .filter(|n| dom::is_tag(n, "slot"))
        .collect();
    for slot in slots {
        if !dom::is_ancestor_or_self(root, &slot) {
            continue;
        }
        let name = dom::get_attr(&slot, "name")
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SLOT.to_string());
        match groups.shift_remove(&name) {
            Some(content) => dom::replace_with(&slot, content),
            None => dom::detach(&slot),
        }
    }
    if !groups.is_empty() {
        debug!(dropped = ?groups.keys().collect::<Vec<_>>(), "unmatched slot content");
    }
}

/// The node whose children replace the call site.
fn component_root(document: &ParsedDocument) -> Handle {
    if document.full_document {
        if let Some(body) = dom::descendants(&document.root)
            .into_iter()
            .find(|n| dom::is_tag(n, "body"))
        {
            return body;
        }
    }
    document.root.clone()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL SITES
// ═══════════════════════════════════════════════════════════════════════════════

impl Compiler<'_> {
    pub(crate) async fn compile_component_call(
        &self,
        unit: &Unit,
        call: &Handle,
        fragments: &Rc<FragmentScope>,
    ) {
        let alias = dom::tag_name(call).unwrap_or_default();
        let Some(record) = unit.imports.borrow().get(&alias).cloned() else {
            return;
        };
        let snippet = format!("<{}", alias);

        if unit.chain.iter().any(|url| *url == record.url) {
            self.diagnose(
                unit,
                DiagnosticTag::CircularImport,
                format!(
                    "'{}' imports itself through {}",
                    record.url,
                    unit.chain.join(" -> ")
                ),
                &snippet,
            );
            dom::detach(call);
            return;
        }
        if unit.chain.len() > self.config.max_depth {
            self.diagnose(
                unit,
                DiagnosticTag::RecursiveExpansion,
                format!("component imports nest deeper than {}", self.config.max_depth),
                &snippet,
            );
            dom::detach(call);
            return;
        }

        let content = match self.host.read_file_content(&record.url).await {
            Ok(content) => content,
            Err(err) => {
                self.diagnose(
                    unit,
                    DiagnosticTag::ComponentReadFailed,
                    format!("cannot read component '{}': {}", alias, err),
                    &snippet,
                );
                dom::detach(call);
                return;
            }
        };

        let mut props = IndexMap::new();
        let mut assigns: Vec<(String, String)> = Vec::new();
        for (name, raw) in dom::attrs(call) {
            if let Some(export) = name.strip_prefix(ASSIGN_PREFIX) {
                let local = match raw.trim() {
                    "" => export.to_string(),
                    local => local.to_string(),
                };
                assigns.push((export.to_string(), local));
            } else if !name.eq_ignore_ascii_case("slot") {
                props.insert(name, self.attribute_value(unit, &raw));
            }
        }

        debug!(component = %alias, url = %record.url, "compile component");
        let document = parse_document_source(&record.url, &content);
        let mut chain = unit.chain.clone();
        chain.push(record.url.clone());
        let callee = Unit::new(
            record.url.clone(),
            content,
            &document,
            Value::object(props),
            chain,
            true,
        );
        self.compile_unit(&callee).await;

        unit.bindings.push_layer();
        for (export, local) in &assigns {
            let value = callee.exports.borrow().get(export).cloned();
            match value {
                Some(value) => {
                    if let Err(err) = unit.bindings.declare(local, value, false) {
                        debug!(component = %alias, "{}", err);
                    }
                }
                None => self.diagnose(
                    unit,
                    DiagnosticTag::ComponentMissingExport,
                    format!("component '{}' does not export '{}'", alias, export),
                    &format!("{}{}", ASSIGN_PREFIX, export),
                ),
            }
        }
        self.compile_scope(unit, call.clone(), fragments.clone())
            .await;
        unit.bindings.pop_layer();

        let root = component_root(&document);
        fill_slots(&root, group_slot_content(call));
        dom::replace_with(call, dom::take_children(&root));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_document_source;

    #[test]
    fn test_group_slot_content() {
        let doc = parse_document_source(
            "t.html",
            "<c><p slot=\"a\">1</p>x<b>2</b><i slot=\"a\">3</i></c>",
        );
        let call = dom::element_children(&doc.root)[0].clone();
        let groups = group_slot_content(&call);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["a"].len(), 2);
        assert_eq!(groups[DEFAULT_SLOT].len(), 2);
        assert!(!dom::has_attr(&groups["a"][0], "slot"));
        assert!(dom::children(&call).is_empty());
    }

    #[test]
    fn test_fill_slots_consumes_groups_once() {
        let callee = parse_document_source(
            "c.html",
            "<h1><slot name=\"title\"></slot></h1><slot></slot><slot name=\"title\"></slot><slot name=\"none\"></slot>",
        );
        let caller = parse_document_source("t.html", "<c><b slot=\"title\">T</b><i>body</i><u slot=\"extra\">x</u></c>");
        let call = dom::element_children(&caller.root)[0].clone();
        fill_slots(&callee.root, group_slot_content(&call));
        assert_eq!(callee.html(), "<h1><b>T</b></h1><i>body</i>");
    }
}
