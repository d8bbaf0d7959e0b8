//! Source parsing and serialization.
//!
//! Documents are parsed with html5ever into an `RcDom`. Sources that carry
//! their own `<html>` are parsed as whole documents; everything else is a
//! fragment parsed in a `<body>` context.

use html5ever::serialize::{SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{
    parse_document, parse_fragment, Attribute, LocalName, Namespace, ParseOpts, QualName,
};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use regex::{Captures, Regex};
use std::cell::RefCell;

use crate::dom;

lazy_static! {
    /// Bodies whose text must not be touched by the pre-pass.
    static ref PROTECTED_RE: Regex = Regex::new(
        r"(?is)<!--.*?-->|<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>"
    )
    .unwrap();

    static ref SELF_CLOSING_RE: Regex = Regex::new(
        r#"<([a-zA-Z][a-zA-Z0-9:._-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*/>"#
    )
    .unwrap();

    /// A start or end tag: slash, name, attributes, close.
    static ref TAG_RE: Regex = Regex::new(
        r#"<(/?)([a-zA-Z][a-zA-Z0-9:._-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)(\s*/?>)"#
    )
    .unwrap();

    static ref ATTRIBUTE_RE: Regex = Regex::new(
        r#"(\s+)([^\s"'>/=]+)((?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)"#
    )
    .unwrap();
}

/// Precedes the lower-cased form of an upper-case attribute name letter.
const UPPER_MARK: char = '\u{E000}';
/// Stands for `<` inside a `{{ }}` marker.
const MARKER_LT: &str = "\u{E001}";
/// Names the control element a `<template>` stands in for.
const CONTROL_ATTR: &str = "data-markup-control";

const CONTROL_TAGS: &[&str] = &["if", "else-if", "else", "for"];
/// Elements in which the HTML parser moves unknown elements out of the table.
const TABLE_SECTIONS: &[&str] = &["table", "thead", "tbody", "tfoot", "tr"];
const TABLE_CELLS: &[&str] = &["td", "th", "caption"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr", "keygen",
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

/// A parsed compilation unit.
pub struct ParsedDocument {
    pub url: String,
    pub dom: RcDom,
    /// The node whose children form the unit: the `Document` for full
    /// documents, the synthetic `<html>` container for fragments.
    pub root: Handle,
    pub full_document: bool,
}

impl ParsedDocument {
    pub fn html(&self) -> String {
        serialize_children(&self.root)
    }
}

impl std::fmt::Debug for ParsedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedDocument")
            .field("url", &self.url)
            .field("full_document", &self.full_document)
            .field("html", &self.html())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRE-PASS
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrites the source so html5ever keeps what the compiler needs.
///
/// Outside comments, scripts and styles:
/// - `<tag ... />` becomes `<tag ...></tag>` for non-void tags. HTML5
///   ignores the self-closing flag on normal elements, which would nest
///   every following sibling inside `<slot />` or `<import ... />`.
/// - `<` inside a `{{ }}` marker is masked so markup in an expression
///   stays text.
/// - Upper-case letters of attribute names are masked so `assign:userName`
///   survives the tokenizer's lower-casing.
/// - Control elements directly inside a table section become `<template>`
///   stand-ins instead of being moved before the table.
///
/// [`parse_document_source`] undoes every mask on the parsed tree.
pub fn prepare_source(source: &str) -> String {
    let mut tables = TableContext::default();
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for protected in PROTECTED_RE.find_iter(source) {
        out.push_str(&prepare_segment(&source[last..protected.start()], &mut tables));
        out.push_str(protected.as_str());
        last = protected.end();
    }
    out.push_str(&prepare_segment(&source[last..], &mut tables));
    out
}

fn prepare_segment(segment: &str, tables: &mut TableContext) -> String {
    let segment = mask_markers(segment);
    let segment = expand_self_closing(&segment);
    let segment = tables.rewrite(&segment);
    mask_attribute_case(&segment)
}

fn expand_self_closing(segment: &str) -> String {
    SELF_CLOSING_RE
        .replace_all(segment, |caps: &Captures| {
            let tag = &caps[1];
            if is_void_element(tag) {
                caps[0].to_string()
            } else {
                format!("<{}{}></{}>", tag, &caps[2], tag)
            }
        })
        .into_owned()
}

fn mask_markers(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(open) = rest.find("{{") {
        let body = open + 2;
        let Some(close) = rest[body..].find("}}") else {
            break;
        };
        let expression = &rest[body..body + close];
        if let Some(nested) = expression.find("{{") {
            // An unterminated `{{` stays as written.
            out.push_str(&rest[..body + nested]);
            rest = &rest[body + nested..];
            continue;
        }
        out.push_str(&rest[..body]);
        out.push_str(&expression.replace('<', MARKER_LT));
        out.push_str("}}");
        rest = &rest[body + close + 2..];
    }
    out.push_str(rest);
    out
}

fn mask_attribute_case(segment: &str) -> String {
    TAG_RE
        .replace_all(segment, |caps: &Captures| {
            if !caps[3].chars().any(|c| c.is_ascii_uppercase()) {
                return caps[0].to_string();
            }
            let attrs = ATTRIBUTE_RE.replace_all(&caps[3], |attr: &Captures| {
                format!("{}{}{}", &attr[1], mask_name(&attr[2]), &attr[3])
            });
            format!("<{}{}{}{}", &caps[1], &caps[2], attrs, &caps[4])
        })
        .into_owned()
}

/// Masks the name after its `prefix:`, which stays case-insensitive.
fn mask_name(name: &str) -> String {
    let split = name.find(':').map(|i| i + 1).unwrap_or(0);
    let (prefix, local) = name.split_at(split);
    let mut out = String::from(prefix);
    for c in local.chars() {
        if c.is_ascii_uppercase() {
            out.push(UPPER_MARK);
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn unmask_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == UPPER_MARK {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Open table elements and control elements, in source order.
#[derive(Default)]
struct TableContext {
    open: Vec<(String, bool)>,
}

impl TableContext {
    /// Whether the innermost open table element is a section rather than
    /// a cell.
    fn in_section(&self) -> bool {
        self.open
            .iter()
            .rev()
            .find(|(tag, _)| is_one_of(tag, TABLE_SECTIONS) || is_one_of(tag, TABLE_CELLS))
            .is_some_and(|(tag, _)| is_one_of(tag, TABLE_SECTIONS))
    }

    fn close(&mut self, tag: &str) -> Option<bool> {
        let index = self.open.iter().rposition(|(open, _)| open == tag)?;
        let standin = self.open[index].1;
        self.open.truncate(index);
        Some(standin)
    }

    fn rewrite(&mut self, segment: &str) -> String {
        TAG_RE
            .replace_all(segment, |caps: &Captures| {
                let closing = !caps[1].is_empty();
                let tag = caps[2].to_ascii_lowercase();
                if is_one_of(&tag, CONTROL_TAGS) {
                    if closing {
                        return match self.close(&tag) {
                            Some(true) => "</template>".to_string(),
                            _ => caps[0].to_string(),
                        };
                    }
                    let standin = self.in_section();
                    self.open.push((tag.clone(), standin));
                    if standin {
                        return format!(
                            "<template {}=\"{}\"{}{}",
                            CONTROL_ATTR, tag, &caps[3], &caps[4]
                        );
                    }
                } else if is_one_of(&tag, TABLE_SECTIONS) || is_one_of(&tag, TABLE_CELLS) {
                    if closing {
                        self.close(&tag);
                    } else {
                        self.open.push((tag, false));
                    }
                }
                caps[0].to_string()
            })
            .into_owned()
    }
}

fn is_one_of(tag: &str, set: &[&str]) -> bool {
    set.contains(&tag)
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNMASKING
// ═══════════════════════════════════════════════════════════════════════════════

/// Reverses [`prepare_source`] on everything under `node`.
fn unmask(node: &Handle) {
    match &node.data {
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            if text.contains(MARKER_LT) {
                *contents.borrow_mut() = StrTendril::from(text.replace(MARKER_LT, "<"));
            }
        }
        NodeData::Element {
            attrs,
            template_contents,
            ..
        } => {
            for attr in attrs.borrow_mut().iter_mut() {
                if attr.name.local.contains(UPPER_MARK) {
                    attr.name.local = LocalName::from(unmask_name(&attr.name.local));
                }
                if attr.value.contains(MARKER_LT) {
                    attr.value = StrTendril::from(attr.value.replace(MARKER_LT, "<"));
                }
            }
            if let Some(contents) = template_contents.borrow().as_ref() {
                unmask(contents);
            }
        }
        _ => {}
    }
    for child in dom::children(node) {
        let child = restore_control(&child).unwrap_or(child);
        unmask(&child);
    }
}

/// Replaces a `<template>` stand-in with the control element it names.
fn restore_control(node: &Handle) -> Option<Handle> {
    let NodeData::Element {
        name,
        attrs,
        template_contents,
        ..
    } = &node.data
    else {
        return None;
    };
    if &*name.local != "template" {
        return None;
    }
    let tag = attrs
        .borrow()
        .iter()
        .find(|a| &*a.name.local == CONTROL_ATTR)
        .map(|a| a.value.to_string())?;
    let kept: Vec<Attribute> = attrs
        .borrow()
        .iter()
        .filter(|a| &*a.name.local != CONTROL_ATTR)
        .cloned()
        .collect();
    let element = Node::new(NodeData::Element {
        name: QualName::new(None, name.ns.clone(), LocalName::from(tag.as_str())),
        attrs: RefCell::new(kept),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    if let Some(contents) = template_contents.borrow_mut().take() {
        for child in dom::take_children(&contents) {
            dom::append(&element, &child);
        }
    }
    dom::replace_with(node, vec![element.clone()]);
    Some(element)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

pub fn is_full_document(source: &str) -> bool {
    source.to_ascii_lowercase().contains("<html")
}

pub fn parse_document_source(url: &str, content: &str) -> ParsedDocument {
    let prepared = prepare_source(content);
    let full_document = is_full_document(content);

    let dom = if full_document {
        parse_document(RcDom::default(), ParseOpts::default()).one(prepared)
    } else {
        parse_fragment(
            RcDom::default(),
            ParseOpts::default(),
            QualName::new(
                None,
                Namespace::from("http://www.w3.org/1999/xhtml"),
                LocalName::from("body"),
            ),
            Vec::new(),
        )
        .one(prepared)
    };

    unmask(&dom.document);
    let root = if full_document {
        dom.document.clone()
    } else {
        fragment_container(&dom.document)
    };

    ParsedDocument {
        url: url.to_string(),
        dom,
        root,
        full_document,
    }
}

/// The `<html>` element html5ever wraps fragment nodes in.
fn fragment_container(document: &Handle) -> Handle {
    document
        .children
        .borrow()
        .iter()
        .find(|c| matches!(c.data, NodeData::Element { .. }))
        .cloned()
        .unwrap_or_else(|| document.clone())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn serialize_children(root: &Handle) -> String {
    let mut bytes = Vec::new();
    let handle: SerializableHandle = root.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    if let Err(err) = html5ever::serialize(&mut bytes, &handle, opts) {
        tracing::warn!("serialization failed: {}", err);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Serializes a single node including its own tag.
pub fn serialize_node(node: &Handle) -> String {
    let mut bytes = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::IncludeNode,
        ..Default::default()
    };
    if let Err(err) = html5ever::serialize(&mut bytes, &handle, opts) {
        tracing::warn!("serialization failed: {}", err);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The elements of a fragment's top level, ignoring text and comments.
pub fn top_level_elements(doc: &ParsedDocument) -> Vec<Handle> {
    dom::element_children(&doc.root)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
