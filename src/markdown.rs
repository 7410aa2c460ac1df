//! HTML to Markdown conversion for extracted page content.
//!
//! Chrome, scripts, ads, and consent banners are stripped during the walk;
//! the remaining body is emitted as Markdown, then a cleanup pass collapses
//! whitespace and removes boilerplate lines.

use ego_tree::NodeRef;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

const STRIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "object", "embed", "nav", "header", "footer",
    "aside", "button",
];

const STRIP_CLASSES: &[&str] = &[
    "nav",
    "navbar",
    "sidebar",
    "menu",
    "ad",
    "ads",
    "advertisement",
    "google-ad",
    "banner",
    "popup",
    "modal",
    "social",
    "share",
    "facebook",
    "twitter",
    "instagram",
    "linkedin",
    "comments",
    "comment",
    "button",
    "btn",
    "scroll",
    "skip",
    "toggle",
    "elementor-action",
];

const STRIP_IDS: &[&str] = &["comments", "comment"];

/// Convert an HTML document to Markdown: `# <title>`, italicized meta
/// description, then the body content.
pub fn convert_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    let title_sel = Selector::parse("title").unwrap();
    if let Some(title) = document.select(&title_sel).next() {
        let title = collect_text(&title);
        if !title.is_empty() {
            out.push_str("# ");
            out.push_str(&title);
            out.push_str("\n\n");
        }
    }

    let meta_sel = Selector::parse("meta[name='description']").unwrap();
    if let Some(meta) = document.select(&meta_sel).next() {
        if let Some(desc) = meta.value().attr("content") {
            let desc = desc.trim();
            if !desc.is_empty() {
                out.push('*');
                out.push_str(desc);
                out.push_str("*\n\n");
            }
        }
    }

    let body_sel = Selector::parse("body").unwrap();
    if let Some(body) = document.select(&body_sel).next() {
        walk_children(body, &mut out);
    }

    clean_markdown(&out)
}

fn should_strip(el: &ElementRef) -> bool {
    let tag = el.value().name();
    if STRIP_TAGS.contains(&tag) {
        return true;
    }

    if let Some(classes) = el.value().attr("class") {
        for class in classes.split_whitespace() {
            let class = class.to_lowercase();
            if STRIP_CLASSES.contains(&class.as_str())
                || class.contains("cookie")
                || class.contains("gdpr")
            {
                return true;
            }
        }
    }

    if let Some(id) = el.value().attr("id") {
        if STRIP_IDS.contains(&id) {
            return true;
        }
    }

    if tag == "img" {
        let src = el.value().attr("src").unwrap_or_default();
        if src.starts_with("data:") || el.value().attr("data-src").is_some() {
            return true;
        }
    }

    false
}

/// Text of an element excluding stripped subtrees, whitespace-trimmed.
fn collect_text(el: &ElementRef) -> String {
    let mut text = String::new();
    collect_text_into(el, &mut text);
    text.trim().to_string()
}

fn collect_text_into(el: &ElementRef, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !should_strip(&child_el) {
                        collect_text_into(&child_el, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn walk_children(el: ElementRef, out: &mut String) {
    for child in el.children() {
        walk_node(child, out);
    }
}

fn walk_node(node: NodeRef<Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            let text = text.trim();
            if !text.is_empty() {
                out.push_str(text);
            }
        }
        Node::Element(_) => {
            let Some(el) = ElementRef::wrap(node) else {
                return;
            };
            if should_strip(&el) {
                return;
            }
            emit_element(el, out);
        }
        _ => {}
    }
}

fn emit_element(el: ElementRef, out: &mut String) {
    let tag = el.value().name();
    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag.as_bytes()[1] - b'0';
            out.push_str("\n\n");
            for _ in 0..level {
                out.push('#');
            }
            out.push(' ');
            out.push_str(&collect_text(&el));
            out.push_str("\n\n");
        }
        "p" => {
            let text = collect_text(&el);
            if !text.is_empty() {
                out.push_str("\n\n");
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
        "br" => out.push('\n'),
        "strong" | "b" => {
            out.push_str("**");
            out.push_str(&collect_text(&el));
            out.push_str("**");
        }
        "em" | "i" => {
            out.push('*');
            out.push_str(&collect_text(&el));
            out.push('*');
        }
        "code" => {
            out.push('`');
            out.push_str(&collect_text(&el));
            out.push('`');
        }
        "pre" => {
            out.push_str("\n\n```\n");
            out.push_str(&el.text().collect::<String>());
            out.push_str("\n```\n\n");
        }
        "blockquote" => {
            out.push_str("\n\n");
            for line in collect_text(&el).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    out.push_str("> ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        "ul" => {
            let li_sel = Selector::parse("li").unwrap();
            out.push_str("\n\n");
            for li in el.select(&li_sel) {
                out.push_str("- ");
                out.push_str(&collect_text(&li));
                out.push('\n');
            }
            out.push('\n');
        }
        "ol" => {
            let li_sel = Selector::parse("li").unwrap();
            out.push_str("\n\n");
            for (i, li) in el.select(&li_sel).enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, collect_text(&li)));
            }
            out.push('\n');
        }
        "a" => {
            let text = collect_text(&el);
            match el.value().attr("href") {
                Some(href) if !text.is_empty() && !href.is_empty() => {
                    out.push_str(&format!("[{}]({})", text, href));
                }
                _ => {
                    if !text.is_empty() {
                        out.push_str(&text);
                    }
                }
            }
        }
        "img" => {
            let alt = el.value().attr("alt").unwrap_or_default();
            if let Some(src) = el.value().attr("src") {
                if !src.starts_with("data:") && !alt.is_empty() {
                    out.push_str(&format!("![{}]({})", alt, src));
                }
            }
        }
        "table" => {
            let tr_sel = Selector::parse("tr").unwrap();
            let cell_sel = Selector::parse("td, th").unwrap();
            out.push_str("\n\n");
            for (row_idx, tr) in el.select(&tr_sel).enumerate() {
                out.push('|');
                let mut cell_count = 0;
                for cell in tr.select(&cell_sel) {
                    out.push(' ');
                    out.push_str(&collect_text(&cell));
                    out.push_str(" |");
                    cell_count += 1;
                }
                out.push('\n');
                if row_idx == 0 {
                    for _ in 0..cell_count {
                        out.push_str("|---");
                    }
                    out.push_str("|\n");
                }
            }
            out.push('\n');
        }
        _ => walk_children(el, out),
    }
}

const BOILERPLATE_PATTERNS: &[&str] = &[
    r"(?i)cookie policy",
    r"(?i)privacy policy",
    r"(?i)terms of service",
    r"(?i)accept cookies",
    r"(?i)this website uses cookies",
    r"(?i)subscribe to our newsletter",
    r"(?i)follow us on",
    r"(?i)share this article",
    r"(?i)print this page",
    r"(?i)scroll to top",
    r"(?i)skip to content",
    r"(?i)data:image/gif;base64,[A-Za-z0-9+/=]+",
    r"\[.*?\]\(#[^)]*\)",
];

/// Whitespace and boilerplate cleanup applied after the element walk.
pub fn clean_markdown(text: &str) -> String {
    let mut text = text.to_string();

    for pattern in BOILERPLATE_PATTERNS {
        if let Ok(re) = Regex::new(pattern) {
            text = re.replace_all(&text, "").into_owned();
        }
    }

    let collapse_newlines = Regex::new(r"\n{3,}").unwrap();
    text = collapse_newlines.replace_all(&text, "\n\n").into_owned();

    let heading_before = Regex::new(r"\n\s*\n\s*(#{1,6})").unwrap();
    text = heading_before.replace_all(&text, "\n\n$1").into_owned();

    let heading_after = Regex::new(r"(#{1,6}[^\n]*)\n\s*\n\s*").unwrap();
    text = heading_after.replace_all(&text, "$1\n\n").into_owned();

    let space_runs = Regex::new(r" +").unwrap();
    text = space_runs.replace_all(&text, " ").into_owned();

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_and_meta_description() {
        let html = r#"<html><head><title>My Page</title><meta name="description" content="A short summary."></head><body><p>Body text goes here.</p></body></html>"#;
        let md = convert_to_markdown(html);
        assert!(md.starts_with("# My Page"));
        assert!(md.contains("*A short summary.*"));
        assert!(md.contains("Body text goes here."));
    }

    #[test]
    fn test_headings_and_lists() {
        let html = r#"<body><h1>Top</h1><h3>Sub</h3><ul><li>alpha</li><li>beta</li></ul><ol><li>one</li><li>two</li></ol></body>"#;
        let md = convert_to_markdown(html);
        assert!(md.contains("# Top"));
        assert!(md.contains("### Sub"));
        assert!(md.contains("- alpha"));
        assert!(md.contains("- beta"));
        assert!(md.contains("1. one"));
        assert!(md.contains("2. two"));
    }

    #[test]
    fn test_scripts_and_chrome_stripped() {
        let html = r#"<body><nav>Site nav links</nav><script>alert(1)</script><div class="sidebar">widgets</div><p>Real content.</p><footer>copyright</footer></body>"#;
        let md = convert_to_markdown(html);
        assert!(md.contains("Real content."));
        assert!(!md.contains("Site nav links"));
        assert!(!md.contains("alert(1)"));
        assert!(!md.contains("widgets"));
        assert!(!md.contains("copyright"));
    }

    #[test]
    fn test_cookie_and_button_elements_stripped() {
        let html = r#"<body><div class="cookie-banner">We use cookies</div><button>Click me</button><span class="btn">Go</span><p>Article.</p></body>"#;
        let md = convert_to_markdown(html);
        assert!(md.contains("Article."));
        assert!(!md.contains("We use cookies"));
        assert!(!md.contains("Click me"));
        assert!(!md.contains("Go"));
    }

    #[test]
    fn test_links_and_images() {
        let html = r#"<body><p><a href="https://example.com/x">A link</a> and <a href="">no href</a></p><img src="https://example.com/pic.png" alt="A picture"><img src="data:image/gif;base64,AAAA" alt="inline"><img src="https://example.com/noalt.png"></body>"#;
        let md = convert_to_markdown(html);
        assert!(md.contains("[A link](https://example.com/x)"));
        assert!(md.contains("no href"));
        assert!(md.contains("![A picture](https://example.com/pic.png)"));
        assert!(!md.contains("data:image"));
        assert!(!md.contains("noalt"));
    }

    #[test]
    fn test_table_rendering() {
        let html = r#"<body><table><tr><th>Name</th><th>Age</th></tr><tr><td>Ada</td><td>36</td></tr></table></body>"#;
        let md = convert_to_markdown(html);
        assert!(md.contains("| Name | Age |"));
        assert!(md.contains("|---|---|"));
        assert!(md.contains("| Ada | 36 |"));
    }

    #[test]
    fn test_blockquote_and_code() {
        let html = r#"<body><blockquote>wise words</blockquote><p>Use <code>cargo</code> here.</p><pre>let x = 1;</pre></body>"#;
        let md = convert_to_markdown(html);
        assert!(md.contains("> wise words"));
        assert!(md.contains("`cargo`"));
        assert!(md.contains("```\nlet x = 1;\n```"));
    }

    #[test]
    fn test_clean_markdown_collapses_whitespace() {
        let cleaned = clean_markdown("a\n\n\n\n\nb   c");
        assert_eq!(cleaned, "a\n\nb c");
    }

    #[test]
    fn test_boilerplate_lines_removed() {
        let md = clean_markdown("Content here\nRead our cookie policy now\nMore content");
        assert!(!md.to_lowercase().contains("cookie policy"));
        assert!(md.contains("Content here"));
        assert!(md.contains("More content"));
    }
}
