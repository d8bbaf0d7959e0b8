use markup5ever_rcdom::{Handle, NodeData};

use crate::dom;

/// Whether the walker should descend into an element's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Descend,
    Skip,
}

/// The NodeVisitor trait is the single traversal mechanism over document
/// trees.
///
/// Rules:
/// 1. Traversal is depth-first in document order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Returning [`Walk::Skip`] from `visit_element` prunes the subtree.
/// 4. Children are snapshotted before visiting, so visitors may detach the
///    node they are looking at.
pub trait NodeVisitor {
    fn visit_element(&mut self, _node: &Handle, _tag: &str) -> Walk {
        Walk::Descend
    }

    fn visit_text(&mut self, _node: &Handle, _text: &str) {}

    fn visit_comment(&mut self, _node: &Handle) {}

    /// Called after an element's children were walked. Not called for
    /// skipped elements.
    fn leave_element(&mut self, _node: &Handle, _tag: &str) {}
}

pub fn walk_children<V: NodeVisitor + ?Sized>(visitor: &mut V, node: &Handle) {
    for child in dom::children(node) {
        walk_node(visitor, &child);
    }
}

pub fn walk_node<V: NodeVisitor + ?Sized>(visitor: &mut V, node: &Handle) {
    match &node.data {
        NodeData::Element { .. } => {
            let tag = dom::tag_name(node).unwrap_or_default();
            if visitor.visit_element(node, &tag) == Walk::Descend {
                walk_children(visitor, node);
                visitor.leave_element(node, &tag);
            }
        }
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            visitor.visit_text(node, &text);
        }
        NodeData::Comment { .. } => visitor.visit_comment(node),
        NodeData::Document => walk_children(visitor, node),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_document_source;

    struct TagCollector {
        tags: Vec<String>,
        texts: usize,
    }

    impl NodeVisitor for TagCollector {
        fn visit_element(&mut self, _node: &Handle, tag: &str) -> Walk {
            self.tags.push(tag.to_string());
            if tag == "raw" {
                Walk::Skip
            } else {
                Walk::Descend
            }
        }

        fn visit_text(&mut self, _node: &Handle, _text: &str) {
            self.texts += 1;
        }
    }

    #[test]
    fn test_walk_order_and_pruning() {
        let doc = parse_document_source("t.html", "<a><b>x</b></a><raw><c>y</c></raw><d></d>");
        let mut collector = TagCollector {
            tags: Vec::new(),
            texts: 0,
        };
        walk_children(&mut collector, &doc.root);
        assert_eq!(collector.tags, vec!["a", "b", "raw", "d"]);
        assert_eq!(collector.texts, 1);
    }
}
