//! Pipeline tests for `compile_html`: scope order, control flow and the
//! three failure tiers.

#[cfg(test)]
pub(crate) mod tests {
    use indexmap::IndexMap;

    use crate::compile::{compile_html, CompileOptions, SourceFile};
    use crate::config::CompilerConfig;
    use crate::diagnostics::{CollectingSink, DiagnosticTag};
    use crate::host::{CompilerHost, MemoryHost};
    use crate::value::{BuildStore, Value};

    pub(crate) struct Rendered {
        pub html: String,
        pub sink: CollectingSink,
        pub exports: IndexMap<String, Value>,
    }

    impl Rendered {
        pub fn tags(&self) -> Vec<DiagnosticTag> {
            self.sink.tags()
        }
    }

    pub(crate) async fn render_with(
        host: &MemoryHost,
        url: &str,
        props: Value,
        store: BuildStore,
        config: &CompilerConfig,
    ) -> Rendered {
        let content = host.read_file_content(url).await.unwrap();
        let sink = CollectingSink::new();
        let output = compile_html(
            SourceFile::new(url, content),
            CompileOptions {
                properties: props,
                build_store: store,
                diagnostics: &sink,
                host,
                config,
            },
        )
        .await;
        Rendered {
            html: output.html(),
            exports: output.exports,
            sink,
        }
    }

    pub(crate) async fn render_host(host: &MemoryHost) -> Rendered {
        render_with(
            host,
            "/index.html",
            Value::empty_object(),
            BuildStore::new(),
            &CompilerConfig::default(),
        )
        .await
    }

    pub(crate) async fn render(source: &str) -> Rendered {
        render_host(&MemoryHost::new().with_file("/index.html", source)).await
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BASICS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_self_closing_div() {
        let out = render("<div />").await;
        assert_eq!(out.html, "<div></div>");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_build_binding_feeds_marker() {
        let out = render("<script build>const foo = 1;</script>{{ foo }}").await;
        assert_eq!(out.html, "1");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_props_reach_markers() {
        let host = MemoryHost::new().with_file("/index.html", "<h1>{{ props.title }}</h1>");
        let mut props = IndexMap::new();
        props.insert("title".to_string(), Value::from("Home"));
        let out = render_with(
            &host,
            "/index.html",
            Value::object(props),
            BuildStore::new(),
            &CompilerConfig::default(),
        )
        .await;
        assert_eq!(out.html, "<h1>Home</h1>");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONDITIONALS
    // ═══════════════════════════════════════════════════════════════════════════════

    fn chain_source(n: u32) -> String {
        format!(
            concat!(
                "<script build>const n = {};</script>",
                "<if condition=\"{{{{ n === 1 }}}}\">one</if>",
                "<else-if condition=\"{{{{ n === 2 }}}}\">two</else-if>",
                "<else-if condition=\"{{{{ n === 3 }}}}\">three</else-if>",
                "<else>many</else>",
            ),
            n
        )
    }

    #[tokio::test]
    async fn test_exactly_one_branch_renders() {
        for (n, expected) in [(1, "one"), (2, "two"), (3, "three"), (9, "many")] {
            let out = render(&chain_source(n)).await;
            assert_eq!(out.html, expected, "n = {}", n);
            assert!(out.sink.is_empty());
        }
    }

    #[tokio::test]
    async fn test_no_branch_without_else() {
        let out = render("<if condition=\"{{ false }}\">a</if><else-if condition=\"false\">b</else-if>").await;
        assert_eq!(out.html, "");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_literal_conditions() {
        let out = render("<if condition>bare</if>|<if condition=\"false\">no</if><else>yes</else>").await;
        assert_eq!(out.html, "bare|yes");
    }

    #[tokio::test]
    async fn test_later_branches_are_not_evaluated() {
        let out = render(concat!(
            "<if condition=\"{{ true }}\">a</if>",
            "<else-if condition=\"{{ explode() }}\">b</else-if>",
        ))
        .await;
        assert_eq!(out.html, "a");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_missing_condition_counts_as_false() {
        let out = render("<if>a</if><else>b</else>").await;
        assert_eq!(out.html, "b");
        assert_eq!(out.tags(), vec![DiagnosticTag::MissingAttribute]);
    }

    #[tokio::test]
    async fn test_orphan_else_is_kept_as_markup() {
        let out = render("<p>a</p>text<else>b {{ 1 + 1 }}</else>").await;
        assert_eq!(out.html, "<p>a</p>text<else>b 2</else>");
        assert_eq!(out.tags(), vec![DiagnosticTag::OrphanElse]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LOOPS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_loop_concatenates_in_order() {
        let out = render("<for each=\"{{ [1,2,3] }}\">{{ item }} at {{ index }}</for>").await;
        assert_eq!(out.html, "1 at 02 at 13 at 2");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_loop_keeps_surrounding_whitespace() {
        let out = render("<ul>\n<for each=\"{{ ['a','b'] }}\"><li>{{ item }}</li></for>\n</ul>").await;
        assert_eq!(out.html, "<ul>\n<li>a</li><li>b</li>\n</ul>");
    }

    #[tokio::test]
    async fn test_loop_names_are_configurable() {
        let out = render("<for each=\"{{ ['a','b'] }}\" as=\"letter\" index=\"i\">{{ i }}{{ letter }}</for>").await;
        assert_eq!(out.html, "0a1b");
    }

    #[tokio::test]
    async fn test_loop_bindings_are_restored() {
        let out = render(concat!(
            "<script build>const item = 'outer';</script>",
            "<for each=\"{{ [1,2] }}\">{{ item }}</for>|",
            "<for each=\"{{ [item] }}\">{{ index }}:{{ item }}</for>",
        ))
        .await;
        assert_eq!(out.html, "12|0:outer");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_nested_loops() {
        let out = render(concat!(
            "<for each=\"{{ [[1,2],[3]] }}\" as=\"row\">",
            "[<for each=\"{{ row }}\" as=\"cell\">{{ cell }}</for>]",
            "</for>",
        ))
        .await;
        assert_eq!(out.html, "[12][3]");
    }

    #[tokio::test]
    async fn test_loop_over_table_rows() {
        let out = render("<table><for each=\"{{ [1,2] }}\"><tr><td>{{ item }}</td></tr></for></table>").await;
        assert_eq!(out.html, "<table><tr><td>1</td></tr><tr><td>2</td></tr></table>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_conditional_table_rows() {
        let out = render(concat!(
            "<table><tbody><if condition=\"{{ false }}\"><tr><td>a</td></tr></if>",
            "<else><tr><td>b</td></tr></else></tbody></table>",
        ))
        .await;
        assert_eq!(out.html, "<table><tbody><tr><td>b</td></tr></tbody></table>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_empty_array_renders_fallback_silently() {
        let out = render("<for each=\"{{ [] }}\">x</for><else>none</else>").await;
        assert_eq!(out.html, "none");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_non_array_renders_fallback_with_diagnostic() {
        let out = render("<for each=\"{{ 5 }}\">x</for>\n<else>none</else>").await;
        assert_eq!(out.html, "\nnone");
        assert_eq!(out.tags(), vec![DiagnosticTag::NonIterable]);

        let out = render("<for each=\"{{ 'abc' }}\">x</for>").await;
        assert_eq!(out.html, "");
        assert_eq!(out.tags(), vec![DiagnosticTag::NonIterable]);
    }

    #[tokio::test]
    async fn test_fallback_dropped_when_items_exist() {
        let out = render("<for each=\"{{ [1] }}\">x</for><else>none</else>").await;
        assert_eq!(out.html, "x");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FAILURE TIERS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_throwing_top_level_script_empties_document() {
        let out = render("<p>a</p><script build>throw new Error('boom');</script><p>{{ 1 }}</p>").await;
        assert_eq!(out.html, "");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedBuildScript]);
        assert!(out.sink.messages()[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn test_throwing_script_in_branch_discards_branch_only() {
        let out = render(concat!(
            "<p>before</p>",
            "<if condition=\"{{ true }}\"><script build>throw 1;</script><b>x</b></if>",
            "<p>after</p>",
        ))
        .await;
        assert_eq!(out.html, "<p>before</p><p>after</p>");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedBuildScript]);
    }

    #[tokio::test]
    async fn test_throwing_script_in_iteration_discards_iteration_only() {
        let out = render(concat!(
            "<for each=\"{{ [1,2,3] }}\">",
            "<script build>if (item === 2) throw new Error('two');</script>",
            "<i>{{ item }}</i>",
            "</for>",
        ))
        .await;
        assert_eq!(out.html, "<i>1</i><i>3</i>");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedBuildScript]);
    }

    #[tokio::test]
    async fn test_failed_marker_is_left_as_written() {
        let out = render("<p>{{ missing }} and {{ 1 + 1 }}</p>").await;
        assert_eq!(out.html, "<p>{{ missing }} and 2</p>");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedExpression]);
        let diagnostic = &out.sink.messages()[0];
        assert_eq!(diagnostic.context.as_deref(), Some("missing"));
        assert_eq!(diagnostic.location.map(|l| l.column), Some(7));
    }

    #[tokio::test]
    async fn test_runaway_script_hits_step_limit() {
        let host = MemoryHost::new().with_file(
            "/index.html",
            "<script build>while (true) {}</script><p>x</p>",
        );
        let config = CompilerConfig {
            max_steps: 10_000,
            ..CompilerConfig::default()
        };
        let out = render_with(&host, "/index.html", Value::Undefined, BuildStore::new(), &config).await;
        assert_eq!(out.html, "");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedBuildScript]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXPORTS, PORTALS, ARTIFACTS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_document_exports() {
        let out = render(concat!(
            "<script build type=\"module\">export const title = 'T'; const hidden = 1;</script>",
            "<export name=\"title\" />",
            "<export name=\"hidden\" as=\"h\" />",
            "<export name=\"nope\" />",
        ))
        .await;
        assert_eq!(out.html, "");
        assert_eq!(out.exports.get("title").and_then(|v| v.as_str()), Some("T"));
        assert_eq!(out.exports.get("h").map(|v| v.to_number()), Some(1.0));
        assert_eq!(out.tags(), vec![DiagnosticTag::MissingExport]);
    }

    #[tokio::test]
    async fn test_export_uses_public_alias() {
        let out = render(concat!(
            "<script build type=\"module\">const local = 42; export { local as answer };</script>",
            "<export name=\"answer\" />",
        ))
        .await;
        assert_eq!(out.exports.get("answer").map(|v| v.to_number()), Some(42.0));
    }

    #[tokio::test]
    async fn test_misplaced_export() {
        let out = render("<script build>const x = 1;</script><div><export name=\"x\" /></div>").await;
        assert_eq!(out.html, "<div></div>");
        assert!(out.exports.is_empty());
        assert_eq!(out.tags(), vec![DiagnosticTag::MisplacedExport]);
    }

    #[tokio::test]
    async fn test_portals_collect_across_scopes() {
        let out = render(concat!(
            "<header><portal name=\"menu\"></portal></header>",
            "<for each=\"{{ ['a','b'] }}\"><i portal=\"menu\">{{ item }}</i></for>",
            "<p portal=\"nowhere\">x</p>",
        ))
        .await;
        assert_eq!(
            out.html,
            "<header><i>a</i><i>b</i></header><p>x</p>"
        );
        assert_eq!(out.tags(), vec![DiagnosticTag::UnknownPortal]);
    }

    #[tokio::test]
    async fn test_raw_content_is_untouched() {
        let out = render("<raw><p>{{ not.evaluated }}</p><if condition=\"false\">x</if></raw>").await;
        assert_eq!(out.html, "<p>{{ not.evaluated }}</p><if condition=\"false\">x</if>");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_full_document_structure() {
        let host = MemoryHost::new().with_file(
            "/index.html",
            concat!(
                "<!DOCTYPE html><html><head><title>{{ props.title }}</title></head>",
                "<body><p>x</p></body></html>",
            ),
        );
        let mut props = IndexMap::new();
        props.insert("title".to_string(), Value::from("T"));
        let out = render_with(
            &host,
            "/index.html",
            Value::object(props),
            BuildStore::new(),
            &CompilerConfig::default(),
        )
        .await;
        assert_eq!(
            out.html,
            "<!DOCTYPE html><html><head><title>T</title></head><body><p>x</p></body></html>"
        );
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_strip_comments_option() {
        let host = MemoryHost::new().with_file("/index.html", "<!-- note --><p>x</p>");
        let config = CompilerConfig {
            strip_comments: true,
            ..CompilerConfig::default()
        };
        let out = render_with(&host, "/index.html", Value::Undefined, BuildStore::new(), &config).await;
        assert_eq!(out.html, "<p>x</p>");
    }
}
