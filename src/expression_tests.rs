//! Marker substitution through the full pipeline: text, attributes,
//! `expand`, escapes and client data.

#[cfg(test)]
mod tests {
    use crate::compile_tests::tests::{render, render_with};
    use crate::config::CompilerConfig;
    use crate::diagnostics::DiagnosticTag;
    use crate::host::MemoryHost;
    use crate::value::{BuildStore, Value};

    // ═══════════════════════════════════════════════════════════════════════════════
    // TEXT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_mixed_text_markers() {
        let out = render("<p>{{ 1 + 2 }} and {{ 'a' + 'b' }}!</p>").await;
        assert_eq!(out.html, "<p>3 and ab!</p>");
    }

    #[tokio::test]
    async fn test_value_formatting() {
        let out = render(concat!(
            "<i>{{ [1, 'a', null] }}</i><i>{{ ({}) }}</i><i>{{ 0.5 }}</i>",
            "<i>{{ null }}</i><i>{{ undefined }}</i><i>{{ 1 / 0 }}</i>",
        ))
        .await;
        assert_eq!(
            out.html,
            "<i>1,a,</i><i>[object Object]</i><i>0.5</i><i>null</i><i>undefined</i><i>Infinity</i>"
        );
    }

    #[tokio::test]
    async fn test_interpolated_markup_is_escaped() {
        let out = render("<p>{{ '<b>bold</b> & co' }}</p>").await;
        assert_eq!(out.html, "<p>&lt;b&gt;bold&lt;/b&gt; &amp; co</p>");
    }

    #[tokio::test]
    async fn test_markup_inside_expression_source() {
        let out = render("<p>{{ '<b>x</b>'.length }}</p><i title=\"{{ 1 < 2 }}\"></i>").await;
        assert_eq!(out.html, "<p>8</p><i title=\"true\"></i>");
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_escaped_marker_is_not_evaluated() {
        let host = MemoryHost::new().with_file(
            "/index.html",
            "<p>\\{{ buildStore.set('hit', 1) }}</p><p>\\{{ \"x\" }} {{ 2 }}</p>",
        );
        let store = BuildStore::new();
        let out = render_with(
            &host,
            "/index.html",
            Value::empty_object(),
            store.clone(),
            &CompilerConfig::default(),
        )
        .await;
        assert_eq!(
            out.html,
            "<p>{{ buildStore.set('hit', 1) }}</p><p>{{ \"x\" }} 2</p>"
        );
        assert!(!store.has("hit"));
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_markers_inside_client_script_and_style_are_literal() {
        let out = render("<script>let t = '{{ x }}';</script><style>a::after { content: '{{ y }}'; }</style>").await;
        assert_eq!(
            out.html,
            "<script>let t = '{{ x }}';</script><style>a::after { content: '{{ y }}'; }</style>"
        );
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_syntax_error_in_marker() {
        let out = render("<p>{{ 1 + }}</p>").await;
        assert_eq!(out.html, "<p>{{ 1 + }}</p>");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedExpression]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_attribute_markers() {
        let out = render(concat!(
            "<script build>const kind = 'primary';</script>",
            "<button class=\"btn btn-{{ kind }}\" data-n=\"{{ 3 * 2 }}\" title=\"\\{{ kind }}\">x</button>",
        ))
        .await;
        assert_eq!(
            out.html,
            "<button class=\"btn btn-primary\" data-n=\"6\" title=\"{{ kind }}\">x</button>"
        );
    }

    #[tokio::test]
    async fn test_undefined_attribute_is_removed() {
        let out = render("<a href=\"{{ undefined }}\" title=\"{{ 'x' }}\" rel=\"{{ null }}\">l</a>").await;
        assert_eq!(out.html, "<a title=\"x\" rel=\"null\">l</a>");
    }

    #[tokio::test]
    async fn test_failed_attribute_keeps_original() {
        let out = render("<a href=\"{{ nope.deep }}\">l</a>").await;
        assert_eq!(out.html, "<a href=\"{{ nope.deep }}\">l</a>");
        assert_eq!(out.tags(), vec![DiagnosticTag::FailedExpression]);
    }

    #[tokio::test]
    async fn test_expand_adds_missing_attributes() {
        let out = render(concat!(
            "<script build>const attrs = { id: 'main', title: undefined, class: 'x' };</script>",
            "<div class=\"keep\" expand=\"{{ attrs }}\"></div>",
        ))
        .await;
        assert_eq!(out.html, "<div class=\"keep\" id=\"main\"></div>");
        assert!(out.sink.is_empty());
    }

    #[tokio::test]
    async fn test_expand_requires_an_object() {
        let out = render("<div expand=\"{{ 5 }}\"></div><p expand=\"id=x\"></p>").await;
        assert_eq!(out.html, "<div></div><p></p>");
        assert_eq!(
            out.tags(),
            vec![DiagnosticTag::InvalidExpandResult, DiagnosticTag::InvalidExpandResult]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CLIENT DATA
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_client_script_receives_build_data() {
        let out = render(concat!(
            "<script build type=\"module\">export const items = [1, 2]; export const name = 'n';</script>",
            "<script>import { items, name as label } from \"build\"; console.log(items, label);</script>",
        ))
        .await;
        assert_eq!(
            out.html,
            "<script>const items = [1,2];\nconst label = \"n\"; console.log(items, label);</script>"
        );
        assert!(out.sink.is_empty(), "{:?}", out.sink.messages());
    }

    #[tokio::test]
    async fn test_client_script_namespace_import() {
        let out = render(concat!(
            "<script build type=\"module\">export const a = 1; export function f() {}</script>",
            "<script>import * as data from 'build';</script>",
        ))
        .await;
        assert_eq!(out.html, "<script>const data = {\"a\":1};</script>");
    }

    #[tokio::test]
    async fn test_client_script_missing_export() {
        let out = render("<script>import { ghost } from \"build\";</script>").await;
        assert_eq!(out.html, "<script>const ghost = undefined;</script>");
        assert_eq!(out.tags(), vec![DiagnosticTag::MissingExport]);
    }

    #[tokio::test]
    async fn test_client_data_cannot_close_script() {
        let out = render(concat!(
            "<script build type=\"module\">export const html = '<' + '/script>';</script>",
            "<script>import { html } from \"build\";</script>",
        ))
        .await;
        assert!(!out.html.contains("\"</script>\""), "{}", out.html);
        assert!(out.html.contains("<\\/script>"), "{}", out.html);
    }
}
