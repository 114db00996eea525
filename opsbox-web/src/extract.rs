//! HTML content extraction and structural classification.

use std::collections::HashSet;

use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};
use url::Url;

use opsbox_core::Category;

/// Extracted main content of a page.
#[derive(Debug, Clone)]
pub struct Extracted {
    /// Page title (`<title>`, else first `<h1>`, else the URL).
    pub title: String,
    /// Main text with stripped regions removed.
    pub text: String,
    /// Absolute http(s) links found in the kept content.
    pub links: Vec<String>,
    /// Content-quality score in [0, 1].
    pub quality: f64,
    /// Number of fenced/`<pre>` code blocks in the kept content.
    pub code_blocks: usize,
}

/// Extracts the main content region of an HTML page.
///
/// Elements matching any of `strip_selectors` (nav, footer, aside, ...) are
/// removed before text and link collection. The quality score rewards pages
/// whose kept text is a substantial fraction of the raw HTML and which carry
/// headings and paragraphs.
pub fn extract_content(html: &str, base_url: &Url, strip_selectors: &[String]) -> Extracted {
    let document = Html::parse_document(html);

    let mut stripped = HashSet::new();
    for selector in strip_selectors {
        if let Ok(selector) = Selector::parse(selector) {
            for element in document.select(&selector) {
                stripped.insert(element.id());
            }
        }
    }

    let mut text = String::new();
    let mut links = Vec::new();
    let mut headings = 0usize;
    let mut paragraphs = 0usize;
    let mut code_blocks = 0usize;
    collect(
        document.tree.root(),
        &stripped,
        base_url,
        &mut text,
        &mut links,
        &mut headings,
        &mut paragraphs,
        &mut code_blocks,
    );
    let text = normalize_whitespace(&text);

    let title = title_of(&document).unwrap_or_else(|| base_url.to_string());

    let density = if html.is_empty() {
        0.0
    } else {
        (text.len() as f64 / html.len() as f64).min(1.0)
    };
    let mut quality = density.sqrt() * 0.6;
    if headings > 0 {
        quality += 0.2;
    }
    if paragraphs > 2 {
        quality += 0.1;
    }
    if text.len() > 200 {
        quality += 0.1;
    }
    let quality = quality.clamp(0.0, 1.0);

    Extracted {
        title,
        text,
        links,
        quality,
        code_blocks,
    }
}

#[allow(clippy::too_many_arguments)]
fn collect(
    node: NodeRef<'_, Node>,
    stripped: &HashSet<ego_tree::NodeId>,
    base_url: &Url,
    text: &mut String,
    links: &mut Vec<String>,
    headings: &mut usize,
    paragraphs: &mut usize,
    code_blocks: &mut usize,
) {
    if stripped.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(t) => {
            text.push_str(t);
            text.push(' ');
        }
        Node::Element(element) => {
            let name = element.name();
            match name {
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => *headings += 1,
                "p" => *paragraphs += 1,
                "pre" | "code" => *code_blocks += 1,
                "a" => {
                    if let Some(href) = element.attr("href")
                        && let Ok(absolute) = base_url.join(href)
                        && matches!(absolute.scheme(), "http" | "https")
                    {
                        let mut absolute = absolute;
                        absolute.set_fragment(None);
                        links.push(absolute.to_string());
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
    for child in node.children() {
        collect(child, stripped, base_url, text, links, headings, paragraphs, code_blocks);
    }
}

fn title_of(document: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        let selector = Selector::parse(selector).ok()?;
        if let Some(element) = document.select(&selector).next() {
            let title = element.text().collect::<String>().trim().to_owned();
            if !title.is_empty() {
                return Some(title);
            }
        }
    }
    None
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim_end().to_owned()
}

const SEVERITY_KEYWORDS: [&str; 6] = ["critical", "severity", "incident", "outage", "p1", "sev1"];

/// Classifies a page by structural features: numbered steps, code blocks,
/// and severity keywords.
pub fn classify(title: &str, text: &str, code_blocks: usize) -> Category {
    let title_lower = title.to_ascii_lowercase();
    if title_lower.contains("runbook") || title_lower.contains("alert response") {
        return Category::Runbook;
    }
    if title_lower.contains("procedure") {
        return Category::Procedure;
    }
    if title_lower.contains("api") || title_lower.contains("reference") {
        return Category::Api;
    }

    let text_lower = text.to_ascii_lowercase();
    let has_steps = has_numbered_steps(&text_lower);
    let has_severity = SEVERITY_KEYWORDS.iter().any(|kw| text_lower.contains(kw));

    if has_steps && has_severity {
        Category::Runbook
    } else if has_steps && code_blocks > 0 {
        Category::Procedure
    } else if title_lower.contains("guide") || title_lower.contains("how to") {
        Category::Guide
    } else if code_blocks > 2 {
        Category::Api
    } else {
        Category::General
    }
}

fn has_numbered_steps(text: &str) -> bool {
    // After whitespace normalization list markers appear mid-line.
    text.contains("1.") && text.contains("2.") || text.contains("step 1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://wiki.example.com/ops/db").unwrap()
    }

    #[test]
    fn strips_configured_regions() {
        let html = r#"<html><head><title>DB Runbook</title></head><body>
            <nav>Home | About</nav>
            <main><h1>DB Runbook</h1><p>1. Check CPU</p><p>2. Restart</p></main>
            <footer>copyright</footer>
        </body></html>"#;
        let extracted = extract_content(html, &base(), &["nav".into(), "footer".into()]);
        assert_eq!(extracted.title, "DB Runbook");
        assert!(extracted.text.contains("Check CPU"));
        assert!(!extracted.text.contains("About"));
        assert!(!extracted.text.contains("copyright"));
    }

    #[test]
    fn links_are_absolutized_and_filtered() {
        let html = r#"<body><a href="/runbooks/db">db</a>
            <a href="mailto:oncall@example.com">mail</a>
            <a href="https://other.example.com/x#frag">x</a></body>"#;
        let extracted = extract_content(html, &base(), &[]);
        assert_eq!(
            extracted.links,
            vec![
                "https://wiki.example.com/runbooks/db".to_owned(),
                "https://other.example.com/x".to_owned(),
            ]
        );
    }

    #[test]
    fn quality_rewards_dense_structured_content() {
        let dense = "<body><h1>T</h1><p>alpha beta gamma delta epsilon zeta</p>\
            <p>eta theta iota kappa</p><p>lambda mu nu xi</p><p>more text here</p></body>";
        let sparse = format!("<body><div>hi</div>{}</body>", "<div></div>".repeat(200));
        let dense_q = extract_content(dense, &base(), &[]).quality;
        let sparse_q = extract_content(&sparse, &base(), &[]).quality;
        assert!(dense_q > sparse_q);
    }

    #[test]
    fn classify_by_structure() {
        assert_eq!(classify("Payments Runbook", "", 0), Category::Runbook);
        assert_eq!(
            classify("Untitled", "severity: critical 1. do x 2. do y", 0),
            Category::Runbook
        );
        assert_eq!(classify("Untitled", "1. install 2. configure", 1), Category::Procedure);
        assert_eq!(classify("Search API", "", 0), Category::Api);
        assert_eq!(classify("Operations Guide", "prose", 0), Category::Guide);
        assert_eq!(classify("Notes", "misc", 0), Category::General);
    }
}
