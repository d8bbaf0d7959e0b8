//! Tree primitives over `markup5ever_rcdom` handles.
//!
//! `Node::parent` is a `Cell<Option<Weak<Node>>>`; it is read by taking the
//! weak pointer out and putting it straight back.

use html5ever::tendril::StrTendril;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData};
use std::cell::RefCell;
use std::rc::Rc;

pub fn tag_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_string().to_ascii_lowercase()),
        _ => None,
    }
}

pub fn is_element(node: &Handle) -> bool {
    matches!(node.data, NodeData::Element { .. })
}

pub fn is_tag(node: &Handle, tag: &str) -> bool {
    tag_name(node).as_deref() == Some(tag)
}

pub fn is_comment(node: &Handle) -> bool {
    matches!(node.data, NodeData::Comment { .. })
}

pub fn text_of(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

pub fn is_whitespace_text(node: &Handle) -> bool {
    text_of(node)
        .map(|t| t.trim().is_empty())
        .unwrap_or(false)
}

pub fn set_text(node: &Handle, text: &str) {
    if let NodeData::Text { contents } = &node.data {
        *contents.borrow_mut() = StrTendril::from(text);
    }
}

/// Concatenated text of every descendant text node.
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    if let NodeData::Text { contents } = &node.data {
        out.push_str(&contents.borrow());
    }
    for child in node.children.borrow().iter() {
        collect_text(child, out);
    }
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn attrs(node: &Handle) -> Vec<(String, String)> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|a| (attribute_name(a), a.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

fn attribute_name(attr: &Attribute) -> String {
    match &attr.name.prefix {
        Some(prefix) => format!("{}:{}", prefix, attr.name.local),
        None => attr.name.local.to_string(),
    }
}

/// Lookups ignore ASCII case; names keep the case they were written in.
pub fn get_attr(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| attribute_name(a).eq_ignore_ascii_case(name))
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub fn has_attr(node: &Handle, name: &str) -> bool {
    get_attr(node, name).is_some()
}

/// Overwrites the value in place, or appends a new attribute.
pub fn set_attr(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        match attrs
            .iter_mut()
            .find(|a| attribute_name(a).eq_ignore_ascii_case(name))
        {
            Some(attr) => attr.value = StrTendril::from(value),
            None => attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
                value: StrTendril::from(value),
            }),
        }
    }
}

pub fn remove_attr(node: &Handle, name: &str) -> Option<String> {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(index) = attrs
            .iter()
            .position(|a| attribute_name(a).eq_ignore_ascii_case(name))
        {
            return Some(attrs.remove(index).value.to_string());
        }
    }
    None
}

pub fn clear_attrs(node: &Handle) {
    if let NodeData::Element { attrs, .. } = &node.data {
        attrs.borrow_mut().clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURE
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parent(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

/// Snapshot of the child list, safe to iterate while mutating the tree.
pub fn children(node: &Handle) -> Vec<Handle> {
    node.children.borrow().clone()
}

pub fn element_children(node: &Handle) -> Vec<Handle> {
    node.children
        .borrow()
        .iter()
        .filter(|c| is_element(c))
        .cloned()
        .collect()
}

pub fn detach(node: &Handle) {
    if let Some(weak) = node.parent.take() {
        if let Some(parent) = weak.upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(child, node));
        }
    }
}

pub fn append(parent: &Handle, child: &Handle) {
    detach(child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

pub fn insert_before(reference: &Handle, new_node: &Handle) {
    let Some(parent) = parent(reference) else {
        return;
    };
    detach(new_node);
    let mut siblings = parent.children.borrow_mut();
    let index = siblings
        .iter()
        .position(|c| Rc::ptr_eq(c, reference))
        .unwrap_or(siblings.len());
    new_node.parent.set(Some(Rc::downgrade(&parent)));
    siblings.insert(index, new_node.clone());
}

/// Puts `replacements` where `node` was and detaches `node`.
pub fn replace_with(node: &Handle, replacements: Vec<Handle>) {
    let Some(parent) = parent(node) else {
        return;
    };
    for r in &replacements {
        detach(r);
        r.parent.set(Some(Rc::downgrade(&parent)));
    }
    let mut siblings = parent.children.borrow_mut();
    if let Some(index) = siblings.iter().position(|c| Rc::ptr_eq(c, node)) {
        siblings.splice(index..=index, replacements);
    }
    drop(siblings);
    node.parent.set(None);
}

/// Replaces the element with its own children.
pub fn unwrap(node: &Handle) {
    let kids = take_children(node);
    replace_with(node, kids);
}

/// Detaches and returns every child.
pub fn take_children(node: &Handle) -> Vec<Handle> {
    let kids: Vec<Handle> = node.children.borrow_mut().drain(..).collect();
    for kid in &kids {
        kid.parent.set(None);
    }
    kids
}

/// Drops all children and attributes.
pub fn empty(node: &Handle) {
    take_children(node);
    clear_attrs(node);
}

pub fn deep_clone(node: &Handle) -> Handle {
    let data = match &node.data {
        NodeData::Element {
            name,
            attrs,
            template_contents,
            mathml_annotation_xml_integration_point,
        } => NodeData::Element {
            name: name.clone(),
            attrs: RefCell::new(attrs.borrow().clone()),
            template_contents: RefCell::new(template_contents.borrow().as_ref().map(deep_clone)),
            mathml_annotation_xml_integration_point: *mathml_annotation_xml_integration_point,
        },
        NodeData::Text { contents } => NodeData::Text {
            contents: RefCell::new(contents.borrow().clone()),
        },
        NodeData::Comment { contents } => NodeData::Comment {
            contents: contents.clone(),
        },
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => NodeData::Doctype {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        },
        NodeData::ProcessingInstruction { target, contents } => {
            NodeData::ProcessingInstruction {
                target: target.clone(),
                contents: contents.clone(),
            }
        }
        NodeData::Document => NodeData::Document,
    };
    let copy = Node::new(data);
    for child in node.children.borrow().iter() {
        let child_copy = deep_clone(child);
        child_copy.parent.set(Some(Rc::downgrade(&copy)));
        copy.children.borrow_mut().push(child_copy);
    }
    copy
}

/// Whether `ancestor` is `node` or one of its ancestors.
pub fn is_ancestor_or_self(ancestor: &Handle, node: &Handle) -> bool {
    let mut current = Some(node.clone());
    while let Some(n) = current {
        if Rc::ptr_eq(&n, ancestor) {
            return true;
        }
        current = parent(&n);
    }
    false
}

/// Every descendant in document order, excluding `node` itself.
pub fn descendants(node: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    for child in node.children.borrow().iter() {
        out.push(child.clone());
        out.extend(descendants(child));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_document_source, serialize_children};

    #[test]
    fn test_attribute_roundtrip() {
        let doc = parse_document_source("t.html", r#"<p a="1" b="2">x</p>"#);
        let p = element_children(&doc.root)[0].clone();
        set_attr(&p, "a", "9");
        set_attr(&p, "c", "3");
        assert_eq!(remove_attr(&p, "b").as_deref(), Some("2"));
        assert_eq!(
            attrs(&p),
            vec![
                ("a".to_string(), "9".to_string()),
                ("c".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn test_unwrap_splices_children_in_place() {
        let doc = parse_document_source("t.html", "<a></a><span><b>1</b><i>2</i></span><c></c>");
        let span = element_children(&doc.root)[1].clone();
        unwrap(&span);
        assert_eq!(
            serialize_children(&doc.root),
            "<a></a><b>1</b><i>2</i><c></c>"
        );
        assert!(parent(&span).is_none());
    }

    #[test]
    fn test_deep_clone_is_detached() {
        let doc = parse_document_source("t.html", "<ul><li>a</li></ul>");
        let ul = element_children(&doc.root)[0].clone();
        let copy = deep_clone(&ul);
        set_attr(&element_children(&copy)[0], "x", "y");
        insert_before(&ul, &copy);
        assert_eq!(
            serialize_children(&doc.root),
            r#"<ul><li x="y">a</li></ul><ul><li>a</li></ul>"#
        );
    }

    #[test]
    fn test_text_content_and_whitespace() {
        let doc = parse_document_source("t.html", "<p>a<b>b</b>c</p> ");
        let p = element_children(&doc.root)[0].clone();
        assert_eq!(text_content(&p), "abc");
        let last = children(&doc.root).pop().unwrap();
        assert!(is_whitespace_text(&last));
    }
}
