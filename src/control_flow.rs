//! `<if>` groups and `<for>` loops.

use markup5ever_rcdom::Handle;
use std::rc::Rc;
use tracing::debug;

use crate::classify::{FragmentScope, LoopGroup};
use crate::compile::{Compiler, Unit};
use crate::diagnostics::DiagnosticTag;
use crate::dom;
use crate::expression::{full_marker, Substitution};
use crate::value::Value;

const DEFAULT_ITEM_NAME: &str = "item";
const DEFAULT_INDEX_NAME: &str = "index";

fn name_attribute(node: &Handle, attr: &str, default: &str) -> String {
    dom::get_attr(node, attr)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Compiler<'_> {
    /// Renders the first truthy member of `[if, else-if*, else?]` and
    /// removes the rest unevaluated.
    pub(crate) async fn render_conditional(
        &self,
        unit: &Unit,
        group: Vec<Handle>,
        fragments: &Rc<FragmentScope>,
    ) {
        let mut rendered = false;
        for branch in group {
            if rendered {
                dom::detach(&branch);
                continue;
            }
            let tag = dom::tag_name(&branch).unwrap_or_default();
            if tag == "else" || self.condition(unit, &branch, &tag) {
                rendered = true;
                self.render_branch(unit, &branch, fragments).await;
            } else {
                dom::detach(&branch);
            }
        }
    }

    fn condition(&self, unit: &Unit, node: &Handle, tag: &str) -> bool {
        let Some(raw) = dom::get_attr(node, "condition") else {
            self.diagnose(
                unit,
                DiagnosticTag::MissingAttribute,
                format!("<{}> requires a 'condition' attribute", tag),
                &format!("<{}", tag),
            );
            return false;
        };
        if let Some(source) = full_marker(&raw) {
            return match self.evaluate(unit, source) {
                Ok(value) => value.is_truthy(),
                Err(err) => {
                    self.diagnose(
                        unit,
                        DiagnosticTag::FailedExpression,
                        format!("condition failed: {}", err),
                        source,
                    );
                    false
                }
            };
        }
        let text = match self.substitute_in(unit, &raw) {
            Substitution::Text(text) => text,
            Substitution::Value(value) => value.to_js_string(),
            Substitution::Unchanged => raw,
        };
        text.trim() != "false"
    }

    /// Compiles `node` as its own scope and replaces it with its children.
    pub(crate) async fn render_branch(
        &self,
        unit: &Unit,
        node: &Handle,
        fragments: &Rc<FragmentScope>,
    ) {
        unit.bindings.push_layer();
        self.compile_scope(unit, node.clone(), fragments.clone())
            .await;
        unit.bindings.pop_layer();
        dom::unwrap(node);
    }

    /// Evaluates `each`: `Some(items)` for an array, `None` after publishing
    /// why it is not one.
    fn loop_items(&self, unit: &Unit, head: &Handle) -> Option<Vec<Value>> {
        let Some(raw) = dom::get_attr(head, "each") else {
            self.diagnose(
                unit,
                DiagnosticTag::MissingAttribute,
                "<for> requires an 'each' attribute".to_string(),
                "<for",
            );
            return None;
        };
        let value = match full_marker(&raw) {
            Some(source) => match self.evaluate(unit, source) {
                Ok(value) => value,
                Err(err) => {
                    self.diagnose(
                        unit,
                        DiagnosticTag::FailedExpression,
                        format!("each failed: {}", err),
                        source,
                    );
                    return None;
                }
            },
            None => Value::string(&raw),
        };
        match value {
            Value::Array(items) => Some(items.borrow().clone()),
            other => {
                self.diagnose(
                    unit,
                    DiagnosticTag::NonIterable,
                    format!("<for each> expects an array, got {}", other.type_of()),
                    &raw,
                );
                None
            }
        }
    }

    /// Renders one clone of the loop body per item, in order, or the
    /// fallback when there is nothing to iterate.
    pub(crate) async fn render_loop(
        &self,
        unit: &Unit,
        group: LoopGroup,
        fragments: &Rc<FragmentScope>,
    ) {
        let LoopGroup { head, fallback } = group;
        let item_name = name_attribute(&head, "as", DEFAULT_ITEM_NAME);
        let index_name = name_attribute(&head, "index", DEFAULT_INDEX_NAME);

        let items = match self.loop_items(unit, &head) {
            Some(items) if !items.is_empty() => items,
            _ => {
                dom::detach(&head);
                if let Some(fallback) = fallback {
                    self.render_branch(unit, &fallback, fragments).await;
                }
                return;
            }
        };
        if let Some(fallback) = fallback {
            dom::detach(&fallback);
        }
        debug!(url = %unit.url, items = items.len(), "render loop");

        for (index, item) in items.into_iter().enumerate() {
            let body = dom::deep_clone(&head);
            dom::clear_attrs(&body);
            dom::insert_before(&head, &body);

            unit.bindings.push_layer();
            for (name, value) in [
                (&item_name, item),
                (&index_name, Value::Number(index as f64)),
            ] {
                if let Err(err) = unit.bindings.declare(name, value, false) {
                    debug!("{}", err);
                }
            }
            self.compile_scope(unit, body.clone(), fragments.clone())
                .await;
            unit.bindings.pop_layer();

            dom::unwrap(&body);
        }
        dom::detach(&head);
    }
}
