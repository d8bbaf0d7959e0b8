//! Fragment expansion.
//!
//! A reference to a named `<fragment>` is replaced by a compiled clone of
//! the definition. The clone sees the definition's `default:` attributes
//! and the reference's own attributes as bindings, and the reference's
//! children fill the clone's `<slot>` placeholders.

use markup5ever_rcdom::Handle;
use std::rc::Rc;
use tracing::debug;

use crate::classify::FragmentScope;
use crate::compile::{Compiler, Unit};
use crate::component::{fill_slots, group_slot_content};
use crate::diagnostics::DiagnosticTag;
use crate::dom;
use crate::value::Value;

const DEFAULT_PREFIX: &str = "default:";

impl Compiler<'_> {
    pub(crate) async fn expand_fragment(
        &self,
        unit: &Unit,
        reference: &Handle,
        fragments: &Rc<FragmentScope>,
    ) {
        let name = dom::tag_name(reference).unwrap_or_default();
        let Some(definition) = fragments.lookup(&name) else {
            return;
        };
        if fragments.depth() >= self.config.max_depth {
            self.diagnose(
                unit,
                DiagnosticTag::RecursiveExpansion,
                format!(
                    "fragment '{}' nests deeper than {} expansions",
                    name, self.config.max_depth
                ),
                &format!("<{}", name),
            );
            dom::detach(reference);
            return;
        }
        debug!(fragment = %name, depth = fragments.depth(), "expand fragment");

        // Attribute values are evaluated in the caller's bindings.
        let mut values: Vec<(String, Value)> = Vec::new();
        for (attr, raw) in dom::attrs(&definition) {
            if let Some(key) = attr.strip_prefix(DEFAULT_PREFIX) {
                values.push((key.to_string(), self.attribute_value(unit, &raw)));
            }
        }
        for (attr, raw) in dom::attrs(reference) {
            if attr.eq_ignore_ascii_case("slot") || attr.starts_with(DEFAULT_PREFIX) {
                continue;
            }
            values.push((attr, self.attribute_value(unit, &raw)));
        }

        let clone = dom::deep_clone(&definition);
        dom::clear_attrs(&clone);
        fill_slots(&clone, group_slot_content(reference));
        dom::insert_before(reference, &clone);
        dom::detach(reference);

        unit.bindings.push_layer();
        for (key, value) in values {
            // Explicit attributes come after defaults and overwrite them.
            if let Err(err) = unit.bindings.declare(&key, value, true) {
                debug!(fragment = %name, "{}", err);
            }
        }
        self.compile_scope(unit, clone.clone(), FragmentScope::expansion(fragments))
            .await;
        unit.bindings.pop_layer();

        dom::unwrap(&clone);
    }
}
