//! Node classification.
//!
//! One walk per scope sorts the scope's nodes into the buckets of a
//! [`Collection`]. The walk never enters control heads, `raw`, scripts,
//! imports, exports, fragment definitions, fragment references or
//! component call sites: each of those is compiled later as its own scope.

use indexmap::IndexMap;
use markup5ever_rcdom::Handle;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, DiagnosticTag};
use crate::dom;
use crate::expression::contains_marker;
use crate::host::CompilerHost;
use crate::parse::serialize_node;
use crate::visitor::{walk_children, NodeVisitor, Walk};

/// Tag names that can be neither import aliases nor fragment names.
pub const RESERVED_TAGS: &[&str] = &[
    "if", "else", "else-if", "for", "raw", "import", "export", "script", "portal", "fragment",
    "style", "slot",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_TAGS.contains(&name)
}

/// Elements that never end the import zone of a full document.
const DOCUMENT_FRAME_TAGS: &[&str] = &["html", "head", "body"];

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub alias: String,
    pub url: String,
}

/// Named fragment definitions visible from a scope, chained to the
/// enclosing scopes.
pub struct FragmentScope {
    definitions: IndexMap<String, Handle>,
    parent: Option<Rc<FragmentScope>>,
    /// Fragment expansions between this scope and its unit root.
    depth: usize,
}

impl FragmentScope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            definitions: IndexMap::new(),
            parent: None,
            depth: 0,
        })
    }

    pub fn child(parent: &Rc<Self>, definitions: IndexMap<String, Handle>) -> Rc<Self> {
        Rc::new(Self {
            definitions,
            parent: Some(parent.clone()),
            depth: parent.depth,
        })
    }

    /// The scope a fragment clone is compiled under.
    pub fn expansion(parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            definitions: IndexMap::new(),
            parent: Some(parent.clone()),
            depth: parent.depth + 1,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn lookup(&self, name: &str) -> Option<Handle> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(def) = scope.definitions.get(name) {
                return Some(def.clone());
            }
            current = scope.parent.as_deref();
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct LoopGroup {
    pub head: Handle,
    pub fallback: Option<Handle>,
}

/// The bucketed nodes of one scope, in document order.
#[derive(Debug, Default)]
pub struct Collection {
    pub build_scripts: Vec<Handle>,
    pub client_scripts: Vec<Handle>,
    /// Text nodes holding at least one marker.
    pub texts: Vec<Handle>,
    /// Elements with a marker in an attribute value, or an `expand`.
    pub attributed: Vec<Handle>,
    pub raws: Vec<Handle>,
    pub exports: Vec<Handle>,
    pub component_calls: Vec<Handle>,
    pub fragment_refs: Vec<Handle>,
    /// `[if, else-if*, else?]` groups.
    pub conditionals: Vec<Vec<Handle>>,
    pub loops: Vec<LoopGroup>,
    /// Elements carrying a rebase attribute; only filled in imported units.
    pub rebaseable: Vec<Handle>,
}

impl Collection {
    /// Drops every bucket; used when a failing build script discards the
    /// scope.
    pub fn reset(&mut self) {
        *self = Collection::default();
    }
}

/// What the classifier needs to know about the scope it walks.
pub struct ClassifyContext<'a> {
    pub unit_url: &'a str,
    pub unit_source: &'a str,
    /// The scope is the root of its compilation unit.
    pub unit_root: bool,
    pub full_document: bool,
    /// The unit was imported, so URLs are rebased.
    pub rebase: bool,
    pub fragments: &'a FragmentScope,
    pub imports: &'a RefCell<IndexMap<String, ImportRecord>>,
    pub host: &'a dyn CompilerHost,
    pub config: &'a CompilerConfig,
    pub diagnostics: &'a dyn DiagnosticSink,
}

impl ClassifyContext<'_> {
    fn publish(&self, tag: DiagnosticTag, message: String, snippet: &str) {
        self.diagnostics.publish(
            Diagnostic::new(tag, self.unit_url, message)
                .with_context(snippet)
                .located(self.unit_source, snippet),
        );
    }
}

fn opening_tag(node: &Handle) -> String {
    let html = serialize_node(node);
    match html.find('>') {
        Some(end) => html[..=end].to_string(),
        None => html,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITIONS PRE-PASS
// ═══════════════════════════════════════════════════════════════════════════════

struct DefinitionFinder<'c, 'a> {
    ctx: &'c ClassifyContext<'a>,
    found: IndexMap<String, Handle>,
}

impl NodeVisitor for DefinitionFinder<'_, '_> {
    fn visit_element(&mut self, node: &Handle, tag: &str) -> Walk {
        match tag {
            "fragment" => {
                self.register(node);
                Walk::Skip
            }
            "script" | "style" | "raw" | "import" | "export" | "if" | "else" | "else-if"
            | "for" => Walk::Skip,
            _ if self.ctx.imports.borrow().contains_key(tag) => Walk::Skip,
            _ => Walk::Descend,
        }
    }
}

impl DefinitionFinder<'_, '_> {
    fn register(&mut self, node: &Handle) {
        let name = dom::get_attr(node, "name")
            .map(|n| n.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if name.is_empty() {
            self.ctx.publish(
                DiagnosticTag::MissingAttribute,
                "<fragment> requires a name".to_string(),
                &opening_tag(node),
            );
            return;
        }
        if is_reserved(&name) {
            self.ctx.publish(
                DiagnosticTag::ReservedName,
                format!("'{}' is a built-in tag and cannot name a fragment", name),
                &name,
            );
            return;
        }
        self.found.entry(name).or_insert_with(|| node.clone());
    }
}

/// Finds the fragment definitions declared directly in `scope`, so that a
/// reference may precede its definition.
pub fn find_definitions(scope: &Handle, ctx: &ClassifyContext<'_>) -> IndexMap<String, Handle> {
    let mut finder = DefinitionFinder {
        ctx,
        found: IndexMap::new(),
    };
    walk_children(&mut finder, scope);
    finder.found
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFIER
// ═══════════════════════════════════════════════════════════════════════════════

/// Open `<if>`/`<for>` groups of one sibling list.
#[derive(Default)]
struct Chain {
    conditional: Option<usize>,
    looped: Option<usize>,
}

struct Classifier<'c, 'a> {
    ctx: &'c ClassifyContext<'a>,
    scope: Handle,
    out: Collection,
    content_seen: bool,
    chains: Vec<Chain>,
}

impl NodeVisitor for Classifier<'_, '_> {
    fn visit_element(&mut self, node: &Handle, tag: &str) -> Walk {
        if !matches!(tag, "import" | "export") && !DOCUMENT_FRAME_TAGS.contains(&tag) {
            self.content_seen = true;
        }

        match tag {
            "if" => {
                self.out.conditionals.push(vec![node.clone()]);
                *self.chain() = Chain {
                    conditional: Some(self.out.conditionals.len() - 1),
                    looped: None,
                };
                return Walk::Skip;
            }
            "for" => {
                self.out.loops.push(LoopGroup {
                    head: node.clone(),
                    fallback: None,
                });
                *self.chain() = Chain {
                    conditional: None,
                    looped: Some(self.out.loops.len() - 1),
                };
                return Walk::Skip;
            }
            "else-if" => {
                if let Some(group) = self.chain().conditional {
                    self.out.conditionals[group].push(node.clone());
                    return Walk::Skip;
                }
                self.orphan(node, tag);
            }
            "else" => {
                let chain = std::mem::take(self.chain());
                if let Some(group) = chain.conditional {
                    self.out.conditionals[group].push(node.clone());
                    return Walk::Skip;
                }
                if let Some(group) = chain.looped {
                    self.out.loops[group].fallback = Some(node.clone());
                    return Walk::Skip;
                }
                self.orphan(node, tag);
            }
            _ => {}
        }

        *self.chain() = Chain::default();

        match tag {
            "script" => {
                if dom::has_attr(node, "build") {
                    self.out.build_scripts.push(node.clone());
                } else {
                    self.out.client_scripts.push(node.clone());
                }
                Walk::Skip
            }
            "style" | "fragment" => Walk::Skip,
            "raw" => {
                self.out.raws.push(node.clone());
                Walk::Skip
            }
            "import" => {
                self.import(node);
                Walk::Skip
            }
            "export" => {
                self.export(node);
                Walk::Skip
            }
            _ if self.ctx.fragments.lookup(tag).is_some() => {
                self.out.fragment_refs.push(node.clone());
                Walk::Skip
            }
            _ if self.ctx.imports.borrow().contains_key(tag) => {
                self.out.component_calls.push(node.clone());
                Walk::Skip
            }
            _ => {
                self.attributes(node);
                self.chains.push(Chain::default());
                Walk::Descend
            }
        }
    }

    fn leave_element(&mut self, _node: &Handle, _tag: &str) {
        self.chains.pop();
    }

    fn visit_text(&mut self, node: &Handle, text: &str) {
        if contains_marker(text) {
            self.out.texts.push(node.clone());
        }
        if !text.trim().is_empty() {
            self.content_seen = true;
            *self.chain() = Chain::default();
        }
    }

    fn visit_comment(&mut self, _node: &Handle) {
        *self.chain() = Chain::default();
    }
}

impl Classifier<'_, '_> {
    fn chain(&mut self) -> &mut Chain {
        if self.chains.is_empty() {
            self.chains.push(Chain::default());
        }
        let last = self.chains.len() - 1;
        &mut self.chains[last]
    }

    fn orphan(&mut self, node: &Handle, tag: &str) {
        self.ctx.publish(
            DiagnosticTag::OrphanElse,
            format!("<{}> does not follow an <if>, <else-if> or <for>", tag),
            &opening_tag(node),
        );
    }

    fn attributes(&mut self, node: &Handle) {
        let attrs = dom::attrs(node);
        if attrs
            .iter()
            .any(|(name, value)| {
                name.eq_ignore_ascii_case("expand") || contains_marker(value)
            })
        {
            self.out.attributed.push(node.clone());
        }
        if self.ctx.rebase
            && attrs
                .iter()
                .any(|(name, _)| self.ctx.config.is_rebase_attribute(name))
        {
            self.out.rebaseable.push(node.clone());
        }
    }

    fn import(&mut self, node: &Handle) {
        let snippet = opening_tag(node);
        if !self.ctx.unit_root || self.content_seen {
            self.ctx.publish(
                DiagnosticTag::ImportAfterContent,
                "<import> must precede all other content".to_string(),
                &snippet,
            );
            return;
        }

        let from = dom::get_attr(node, "from").unwrap_or_default();
        if from.trim().is_empty() {
            self.ctx.publish(
                DiagnosticTag::MissingAttribute,
                "<import> requires a 'from' attribute".to_string(),
                &snippet,
            );
            return;
        }
        let url = self.ctx.host.resolve_url(self.ctx.unit_url, from.trim());
        let path = url.split(['?', '#']).next().unwrap_or(&url).to_string();
        let extension = Path::new(&path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        if !matches!(extension.as_deref(), Some("html") | Some("svg")) {
            self.ctx.publish(
                DiagnosticTag::UnsupportedImport,
                format!("cannot import '{}': only .html and .svg documents", from),
                &snippet,
            );
            return;
        }

        let alias = match dom::get_attr(node, "as") {
            Some(alias) => alias.trim().to_ascii_lowercase(),
            None => Path::new(&path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default(),
        };
        if alias.is_empty() {
            self.ctx.publish(
                DiagnosticTag::EmptyAlias,
                format!("import of '{}' has an empty alias", from),
                &snippet,
            );
            return;
        }
        if is_reserved(&alias) {
            self.ctx.publish(
                DiagnosticTag::ReservedName,
                format!("'{}' is a built-in tag and cannot be an import alias", alias),
                &snippet,
            );
            return;
        }
        if self.ctx.imports.borrow().contains_key(&alias) {
            self.ctx.publish(
                DiagnosticTag::DuplicateAlias,
                format!("alias '{}' is already imported", alias),
                &snippet,
            );
            return;
        }

        self.ctx
            .imports
            .borrow_mut()
            .insert(alias.clone(), ImportRecord { alias, url });
    }

    fn export(&mut self, node: &Handle) {
        let parent = dom::parent(node);
        let legal = self.ctx.unit_root
            && parent.as_ref().is_some_and(|p| {
                Rc::ptr_eq(p, &self.scope)
                    || (self.ctx.full_document
                        && dom::tag_name(p)
                            .is_some_and(|t| DOCUMENT_FRAME_TAGS.contains(&t.as_str())))
            });
        if legal {
            self.out.exports.push(node.clone());
        } else {
            self.ctx.publish(
                DiagnosticTag::MisplacedExport,
                "<export> is only legal at document level".to_string(),
                &opening_tag(node),
            );
            dom::detach(node);
        }
    }
}

/// Classifies the children of `scope`.
pub fn classify(scope: &Handle, ctx: &ClassifyContext<'_>) -> Collection {
    let mut classifier = Classifier {
        ctx,
        scope: scope.clone(),
        out: Collection::default(),
        content_seen: !ctx.unit_root,
        chains: vec![Chain::default()],
    };
    walk_children(&mut classifier, scope);
    classifier.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::host::MemoryHost;
    use crate::parse::parse_document_source;

    struct Fixture {
        host: MemoryHost,
        config: CompilerConfig,
        sink: CollectingSink,
        imports: RefCell<IndexMap<String, ImportRecord>>,
        fragments: Rc<FragmentScope>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                host: MemoryHost::new(),
                config: CompilerConfig::default(),
                sink: CollectingSink::new(),
                imports: RefCell::new(IndexMap::new()),
                fragments: FragmentScope::root(),
            }
        }

        fn ctx<'a>(&'a self, source: &'a str, rebase: bool) -> ClassifyContext<'a> {
            ClassifyContext {
                unit_url: "/pages/index.html",
                unit_source: source,
                unit_root: true,
                full_document: false,
                rebase,
                fragments: &self.fragments,
                imports: &self.imports,
                host: &self.host,
                config: &self.config,
                diagnostics: &self.sink,
            }
        }
    }

    fn run(source: &str) -> (Collection, Fixture) {
        let fixture = Fixture::new();
        let doc = parse_document_source("/pages/index.html", source);
        let collection = classify(&doc.root, &fixture.ctx(source, false));
        (collection, fixture)
    }

    #[test]
    fn test_buckets() {
        let (c, f) = run(concat!(
            "<script build>const a = 1;</script>",
            "<p title=\"{{ a }}\">{{ a }}</p>",
            "<script>let x;</script>",
            "<raw>{{ untouched }}</raw>",
            "<style>p { color: red }</style>",
        ));
        assert!(f.sink.is_empty());
        assert_eq!(c.build_scripts.len(), 1);
        assert_eq!(c.client_scripts.len(), 1);
        assert_eq!(c.attributed.len(), 1);
        assert_eq!(c.texts.len(), 1);
        assert_eq!(c.raws.len(), 1);
    }

    #[test]
    fn test_conditional_chain_skips_whitespace() {
        let (c, f) = run("<if condition=\"true\">a</if>\n  <else-if condition=\"false\">b</else-if> <else>c</else>");
        assert!(f.sink.is_empty());
        assert_eq!(c.conditionals.len(), 1);
        assert_eq!(c.conditionals[0].len(), 3);
        assert!(c.texts.is_empty());
    }

    #[test]
    fn test_text_breaks_chain() {
        let (c, f) = run("<if condition=\"true\">a</if> text <else>c</else>");
        assert_eq!(c.conditionals[0].len(), 1);
        assert_eq!(f.sink.tags(), vec![DiagnosticTag::OrphanElse]);
    }

    #[test]
    fn test_comment_breaks_chain() {
        let (c, f) = run("<for each=\"{{ [] }}\">a</for><!-- x --><else>none</else>");
        assert!(c.loops[0].fallback.is_none());
        assert_eq!(f.sink.count(DiagnosticTag::OrphanElse), 1);
    }

    #[test]
    fn test_loop_fallback_pairs_with_for() {
        let (c, f) = run("<for each=\"{{ [] }}\">a</for><else>none</else>");
        assert!(f.sink.is_empty());
        assert!(c.loops[0].fallback.is_some());
    }

    #[test]
    fn test_chain_state_is_per_sibling_list() {
        let (c, f) = run("<if condition=\"true\"></if><div><else>x</else></div>");
        assert_eq!(c.conditionals[0].len(), 1);
        assert_eq!(f.sink.count(DiagnosticTag::OrphanElse), 1);
    }

    #[test]
    fn test_orphan_else_children_are_classified() {
        let (c, _) = run("<else><b>{{ a }}</b></else>");
        assert_eq!(c.texts.len(), 1);
    }

    #[test]
    fn test_imports_register_aliases() {
        let (c, f) = run(concat!(
            "<import from=\"../parts/card.html\" />",
            "<import from=\"icon.svg\" as=\"Logo\" />",
            "<card></card><logo></logo>",
        ));
        assert!(f.sink.is_empty(), "{:?}", f.sink.messages());
        let imports = f.imports.borrow();
        assert_eq!(imports["card"].url, "/parts/card.html");
        assert_eq!(imports["logo"].url, "/pages/icon.svg");
        assert_eq!(c.component_calls.len(), 2);
    }

    #[test]
    fn test_import_diagnostics() {
        let (_, f) = run(concat!(
            "<import from=\"a.html\" as=\"\" />",
            "<import from=\"b.html\" as=\"slot\" />",
            "<import from=\"c.js\" />",
            "<import from=\"d.html\" as=\"x\" />",
            "<import from=\"e.html\" as=\"x\" />",
            "<import as=\"y\" />",
            "<p>content</p>",
            "<import from=\"late.html\" />",
        ));
        assert_eq!(
            f.sink.tags(),
            vec![
                DiagnosticTag::EmptyAlias,
                DiagnosticTag::ReservedName,
                DiagnosticTag::UnsupportedImport,
                DiagnosticTag::DuplicateAlias,
                DiagnosticTag::MissingAttribute,
                DiagnosticTag::ImportAfterContent,
            ]
        );
        assert_eq!(f.imports.borrow().len(), 1);
    }

    #[test]
    fn test_misplaced_export_is_removed() {
        let source = "<export name=\"a\"></export><div><export name=\"b\"></export></div>";
        let fixture = Fixture::new();
        let doc = parse_document_source("/pages/index.html", source);
        let c = classify(&doc.root, &fixture.ctx(source, false));
        assert_eq!(c.exports.len(), 1);
        assert_eq!(fixture.sink.tags(), vec![DiagnosticTag::MisplacedExport]);
        assert_eq!(doc.html(), "<export name=\"a\"></export><div></div>");
    }

    #[test]
    fn test_fragment_definitions_precede_references() {
        let source = "<card></card><fragment name=\"card\"><b>c</b></fragment><fragment name=\"if\"></fragment>";
        let mut fixture = Fixture::new();
        let doc = parse_document_source("/pages/index.html", source);
        let defs = find_definitions(&doc.root, &fixture.ctx(source, false));
        assert_eq!(defs.len(), 1);
        assert_eq!(fixture.sink.tags(), vec![DiagnosticTag::ReservedName]);

        fixture.fragments = FragmentScope::child(&FragmentScope::root(), defs);
        let c = classify(&doc.root, &fixture.ctx(source, false));
        assert_eq!(c.fragment_refs.len(), 1);
    }

    #[test]
    fn test_fragment_lookup_walks_parents() {
        let doc = parse_document_source("t.html", "<fragment name=\"a\"></fragment>");
        let mut defs = IndexMap::new();
        defs.insert("a".to_string(), dom::element_children(&doc.root)[0].clone());
        let outer = FragmentScope::child(&FragmentScope::root(), defs);
        let inner = FragmentScope::child(&outer, IndexMap::new());
        assert!(inner.lookup("a").is_some());
        assert!(inner.lookup("b").is_none());
        assert_eq!(FragmentScope::expansion(&inner).depth(), 1);
    }

    #[test]
    fn test_rebaseable_only_when_imported() {
        let source = "<img src=\"a.png\"><a href=\"/abs\">x</a>";
        let fixture = Fixture::new();
        let doc = parse_document_source("/parts/card.html", source);
        let c = classify(&doc.root, &fixture.ctx(source, true));
        assert_eq!(c.rebaseable.len(), 2);
        let c = classify(&doc.root, &fixture.ctx(source, false));
        assert!(c.rebaseable.is_empty());
    }
}
