//! Component and fragment expansion tests: props, slots, `assign:`,
//! URL rebasing and the recursion guards.

#[cfg(test)]
mod tests {
    use crate::compile_tests::tests::{render, render_host, render_with};
    use crate::config::CompilerConfig;
    use crate::diagnostics::DiagnosticTag;
    use crate::host::MemoryHost;
    use crate::value::{BuildStore, Value};

    // ═══════════════════════════════════════════════════════════════════════════════
    // COMPONENTS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_named_slot() {
        let host = MemoryHost::new()
            .with_file("/comp.html", "<div class=\"card\"><slot name=\"text\" /></div>")
            .with_file(
                "/index.html",
                "<import from=\"comp.html\" /><comp><p slot=\"text\">child</p></comp>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<div class=\"card\"><p>child</p></div>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_default_slot_and_unmatched_slot() {
        let host = MemoryHost::new()
            .with_file(
                "/panel.html",
                "<section><slot /></section><aside><slot name=\"side\" /></aside>",
            )
            .with_file(
                "/index.html",
                "<import from=\"panel.html\" /><panel><b>x</b> y</panel>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<section><b>x</b> y</section><aside></aside>");
    }

    #[tokio::test]
    async fn test_explicit_alias() {
        let host = MemoryHost::new()
            .with_file("/parts/button.html", "<button>ok</button>")
            .with_file(
                "/index.html",
                "<import from=\"parts/button.html\" as=\"ui-button\" /><ui-button></ui-button>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<button>ok</button>");
    }

    #[tokio::test]
    async fn test_props_from_call_site() {
        let host = MemoryHost::new()
            .with_file("/card.html", "<h2>{{ props.title }}</h2><p>{{ props.count + 1 }}</p>")
            .with_file(
                "/index.html",
                "<import from=\"card.html\" /><card title=\"Hello\" count=\"{{ 2 }}\"></card>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<h2>Hello</h2><p>3</p>");
    }

    #[tokio::test]
    async fn test_component_bindings_are_isolated() {
        let host = MemoryHost::new()
            .with_file("/inner.html", "<p>{{ secret }}</p>")
            .with_file(
                "/index.html",
                "<import from=\"inner.html\" /><script build>const secret = 1;</script><inner></inner>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<p>{{ secret }}</p>");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedExpression]);
        assert_eq!(out.sink.messages()[0].source_file, "/inner.html");
    }

    #[tokio::test]
    async fn test_assign_exposes_export_to_children() {
        let host = MemoryHost::new()
            .with_file(
                "/banner.html",
                concat!(
                    "<script build type=\"module\">export const heading = props.name.toUpperCase();</script>",
                    "<export name=\"heading\" />",
                    "<h1>{{ heading }}</h1><slot />",
                ),
            )
            .with_file(
                "/index.html",
                "<import from=\"banner.html\" /><banner name=\"site\" assign:heading=\"h\"><p>{{ h }}</p></banner>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<h1>SITE</h1><p>SITE</p>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_assign_missing_export() {
        let host = MemoryHost::new()
            .with_file("/banner.html", "<h1>x</h1>")
            .with_file(
                "/index.html",
                "<import from=\"banner.html\" /><banner assign:nope></banner>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<h1>x</h1>");
        assert_eq!(out.tags(), vec![DiagnosticTag::ComponentMissingExport]);
    }

    #[tokio::test]
    async fn test_assign_camel_case_export() {
        let host = MemoryHost::new()
            .with_file(
                "/user.html",
                concat!(
                    "<script build type=\"module\">export const userName = 'ann';</script>",
                    "<export name=\"userName\"></export><slot></slot>",
                ),
            )
            .with_file(
                "/index.html",
                "<import from=\"./user.html\" /><user assign:userName=\"who\"><b>{{ who }}</b></user>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<b>ann</b>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_camel_case_props() {
        let host = MemoryHost::new()
            .with_file("/card.html", "<p>{{ props.firstName }}</p>")
            .with_file(
                "/index.html",
                "<import from=\"card.html\" /><card firstName=\"Ann\"></card>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<p>Ann</p>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_circular_import() {
        let host = MemoryHost::new()
            .with_file("/loop-a.html", "<import from=\"loop-b.html\" /><p>a</p><loop-b></loop-b>")
            .with_file("/loop-b.html", "<import from=\"loop-a.html\" /><p>b</p><loop-a></loop-a>")
            .with_file("/index.html", "<import from=\"loop-a.html\" /><loop-a></loop-a>");
        let out = render_host(&host).await;
        assert_eq!(out.html, "<p>a</p><p>b</p>");
        assert_eq!(out.tags(), vec![DiagnosticTag::CircularImport]);
    }

    #[tokio::test]
    async fn test_unreadable_component() {
        let out = render("<import from=\"gone.html\" /><gone>child</gone><p>rest</p>").await;
        assert_eq!(out.html, "<p>rest</p>");
        assert_eq!(out.tags(), vec![DiagnosticTag::ComponentReadFailed]);
    }

    #[tokio::test]
    async fn test_relative_urls_are_rebased() {
        let host = MemoryHost::new()
            .with_file(
                "/parts/card.html",
                "<img src=\"img/a.png\"><a href=\"/abs\">x</a><a href=\"#top\">t</a>",
            )
            .with_file(
                "/index.html",
                "<import from=\"parts/card.html\" /><img src=\"img/b.png\"><card></card>",
            );
        let out = render_host(&host).await;
        assert_eq!(
            out.html,
            "<img src=\"img/b.png\"><img src=\"/parts/img/a.png\"><a href=\"/abs\">x</a><a href=\"#top\">t</a>"
        );
    }

    #[tokio::test]
    async fn test_import_after_content() {
        let out = render("<p>x</p><import from=\"late.html\" /><late></late>").await;
        assert_eq!(out.tags(), vec![DiagnosticTag::ImportAfterContent]);
        assert_eq!(out.html, "<p>x</p><late></late>");
    }

    #[tokio::test]
    async fn test_reserved_alias() {
        let out = render("<import from=\"x.html\" as=\"slot\" />").await;
        assert_eq!(out.tags(), vec![DiagnosticTag::ReservedName]);
    }

    #[tokio::test]
    async fn test_nested_component_depth_limit() {
        let host = MemoryHost::new()
            .with_file("/d1.html", "<import from=\"d2.html\" /><d2></d2>")
            .with_file("/d2.html", "<import from=\"d3.html\" /><d3></d3>")
            .with_file("/d3.html", "<p>deep</p>")
            .with_file("/index.html", "<import from=\"d1.html\" /><d1></d1>");
        let config = CompilerConfig {
            max_depth: 2,
            ..CompilerConfig::default()
        };
        let out = render_with(&host, "/index.html", Value::empty_object(), BuildStore::new(), &config).await;
        assert_eq!(out.html, "");
        assert_eq!(out.tags(), vec![DiagnosticTag::RecursiveExpansion]);

        let out = render_host(&host).await;
        assert_eq!(out.html, "<p>deep</p>");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FRAGMENTS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_fragment_defaults_and_overrides() {
        let out = render(concat!(
            "<fragment name=\"badge\" default:color=\"red\"><span class=\"{{ color }}\"><slot /></span></fragment>",
            "<badge>hi</badge><badge color=\"blue\">yo</badge>",
        ))
        .await;
        assert_eq!(out.html, "<span class=\"red\">hi</span><span class=\"blue\">yo</span>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_fragment_camel_case_attributes() {
        let out = render(concat!(
            "<fragment name=\"greet\" default:firstName=\"Ann\"><i>{{ firstName }} {{ lastName }}</i></fragment>",
            "<greet lastName=\"Lee\"></greet>",
        ))
        .await;
        assert_eq!(out.html, "<i>Ann Lee</i>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_fragment_sees_caller_bindings() {
        let out = render(concat!(
            "<fragment name=\"row\"><li>{{ label }}: {{ value }}</li></fragment>",
            "<script build>const label = 'n';</script>",
            "<for each=\"{{ [1,2] }}\"><row value=\"{{ item }}\"></row></for>",
        ))
        .await;
        assert_eq!(out.html, "<li>n: 1</li><li>n: 2</li>");
    }

    #[tokio::test]
    async fn test_fragment_shadows_import() {
        let host = MemoryHost::new()
            .with_file("/badge.html", "<b>component</b>")
            .with_file(
                "/index.html",
                "<import from=\"badge.html\" /><fragment name=\"badge\"><i>fragment</i></fragment><badge></badge>",
            );
        let out = render_host(&host).await;
        assert_eq!(out.html, "<i>fragment</i>");
        assert_eq!(host.reads(), vec!["/index.html".to_string()]);
    }

    #[tokio::test]
    async fn test_nested_fragment_scopes() {
        let out = render(concat!(
            "<fragment name=\"tag-x\"><b>outer</b></fragment>",
            "<if condition=\"true\"><fragment name=\"tag-x\"><i>inner</i></fragment><tag-x></tag-x></if>",
            "<tag-x></tag-x>",
        ))
        .await;
        assert_eq!(out.html, "<i>inner</i><b>outer</b>");
    }

    #[tokio::test]
    async fn test_recursive_fragment_is_cut_off() {
        let host = MemoryHost::new().with_file(
            "/index.html",
            "<fragment name=\"loop-f\"><loop-f></loop-f></fragment><loop-f></loop-f>",
        );
        let config = CompilerConfig {
            max_depth: 4,
            ..CompilerConfig::default()
        };
        let out = render_with(&host, "/index.html", Value::empty_object(), BuildStore::new(), &config).await;
        assert_eq!(out.html, "");
        assert_eq!(out.tags(), vec![DiagnosticTag::RecursiveExpansion]);
    }
}
