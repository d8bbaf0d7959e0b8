#[cfg(test)]
mod tests {
    use crate::compile_tests::tests::render;
    use crate::parse::{parse_document_source, top_level_elements};
    use crate::dom;

    #[tokio::test]
    async fn test_plain_markup_round_trips() {
        let cases = [
            "<section class=\"a\"><p>Hello <b>world</b></p><img src=\"x.png\" alt=\"\"></section>",
            "<ul>\n  <li>one</li>\n  <li>two</li>\n</ul>\n",
            "<!-- kept --><p>a &amp; b</p>",
            "<input type=\"checkbox\" checked=\"\"><br>",
            "<custom-element data-x=\"1\"><span>t</span></custom-element>",
        ];
        for source in cases {
            let out = render(source).await;
            assert_eq!(out.html, source);
            assert!(out.sink.is_empty());
        }
    }

    #[tokio::test]
    async fn test_full_document_round_trips() {
        let source = "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>t</title></head><body><p>x</p></body></html>";
        let out = render(source).await;
        assert_eq!(out.html, source);
    }

    #[tokio::test]
    async fn test_self_closing_custom_tags_do_not_swallow_siblings() {
        let out = render("<div /><span />after").await;
        assert_eq!(out.html, "<div></div><span></span>after");
    }

    #[test]
    fn test_top_level_elements_skip_text() {
        let doc = parse_document_source("t.html", "a<b>1</b> <i>2</i><!-- c -->");
        let tags: Vec<_> = top_level_elements(&doc)
            .iter()
            .filter_map(dom::tag_name)
            .collect();
        assert_eq!(tags, vec!["b", "i"]);
    }

    #[test]
    fn test_compiler_tags_parse_as_elements() {
        let doc = parse_document_source(
            "t.html",
            "<if condition=\"x\"><p>a</p></if><for each=\"y\"><li>b</li></for><else>c</else>",
        );
        let tags: Vec<_> = top_level_elements(&doc)
            .iter()
            .filter_map(dom::tag_name)
            .collect();
        assert_eq!(tags, vec!["if", "for", "else"]);
    }
}
