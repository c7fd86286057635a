use crate::types::{AggregatorError, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// Subtrees that never contribute text.
const DROPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "form",
];

/// Tried in order; the first match is taken as the article body.
const CONTAINER_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".article-content",
    ".post-content",
    ".entry-content",
    "#content",
];

/// Blocks whose text is emitted whole, so nothing inside them is emitted again.
const ENCLOSING_BLOCKS: &[&str] = &["p", "ul", "ol", "blockquote"];

/// Reduces article HTML to Markdown-like text: title, headings, paragraphs,
/// list items, quotes and a trailing list of external links.
///
/// Output depends only on the input bytes.
pub struct ContentExtractor {
    containers: Vec<Selector>,
    blocks: Selector,
    title: Selector,
    body: Selector,
    links: Selector,
}

impl ContentExtractor {
    pub fn new() -> Result<Self> {
        let containers = CONTAINER_SELECTORS
            .iter()
            .map(|css| selector(css))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            containers,
            blocks: selector("p, h1, h2, h3, h4, h5, h6, ul, ol, blockquote")?,
            title: selector("h1")?,
            body: selector("body")?,
            links: selector("a[href]")?,
        })
    }

    pub fn extract(&self, raw_html: &str) -> Result<String> {
        if !raw_html.contains('<') {
            return Err(AggregatorError::Extraction("Input contains no markup".to_string()));
        }

        let document = Html::parse_document(raw_html);
        let container = self.find_container(&document);

        let mut sections = Vec::new();

        // A page title living outside the article body still names the article
        if let Some(title) = document.select(&self.title).find(|el| !is_dropped(el)) {
            let text = collapsed_text(&title);
            if !text.is_empty() && !is_within(&title, &container) {
                sections.push(format!("# {}", text));
            }
        }

        for element in container.select(&self.blocks) {
            if is_dropped(&element) || has_enclosing_block(&element, &container) {
                continue;
            }
            if let Some(block) = render_block(&element) {
                sections.push(block);
            }
        }

        let mut content = sections.join("\n\n");

        let links = self.external_links(&container);
        if !links.is_empty() {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str("## External Links\n");
            content.push_str(&links.join("\n"));
        }

        if content.trim().is_empty() {
            return Err(AggregatorError::Extraction(
                "No readable content found in page".to_string(),
            ));
        }

        Ok(content)
    }

    fn find_container<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        for candidate in &self.containers {
            if let Some(el) = document.select(candidate).find(|el| !is_dropped(el)) {
                return el;
            }
        }

        document
            .select(&self.body)
            .next()
            .unwrap_or_else(|| document.root_element())
    }

    fn external_links(&self, container: &ElementRef) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for anchor in container.select(&self.links) {
            if is_dropped(&anchor) {
                continue;
            }

            let href = match anchor.value().attr("href") {
                Some(h) => h.trim(),
                None => continue,
            };
            if !(href.starts_with("http://") || href.starts_with("https://")) {
                continue;
            }

            let text = collapsed_text(&anchor);
            if text.is_empty() || !seen.insert(href.to_string()) {
                continue;
            }

            links.push(format!("[{}]({})", text, href));
        }

        links
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| AggregatorError::Extraction(format!("Bad selector {}: {:?}", css, e)))
}

fn render_block(element: &ElementRef) -> Option<String> {
    let tag = element.value().name();

    let rendered = match tag {
        "p" => collapsed_text(element),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let text = collapsed_text(element);
            if text.is_empty() {
                return None;
            }
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            format!("{} {}", "#".repeat(level), text)
        }
        "ul" | "ol" => element
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| child.value().name() == "li" && !is_dropped(child))
            .map(|li| collapsed_text(&li))
            .filter(|text| !text.is_empty())
            .map(|text| format!("- {}", text))
            .collect::<Vec<_>>()
            .join("\n"),
        "blockquote" => {
            let text = collapsed_text(element);
            if text.is_empty() {
                return None;
            }
            format!("> {}", text)
        }
        _ => return None,
    };

    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// Text of the element with runs of whitespace folded to one space.
fn collapsed_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the element or one of its ancestors is a dropped tag.
fn is_dropped(element: &ElementRef) -> bool {
    if DROPPED_TAGS.contains(&element.value().name()) {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|el| DROPPED_TAGS.contains(&el.value().name()))
}

fn is_within(element: &ElementRef, container: &ElementRef) -> bool {
    element.id() == container.id() || element.ancestors().any(|node| node.id() == container.id())
}

fn has_enclosing_block(element: &ElementRef, container: &ElementRef) -> bool {
    for node in element.ancestors() {
        if node.id() == container.id() {
            return false;
        }
        if let Some(el) = ElementRef::wrap(node) {
            if ENCLOSING_BLOCKS.contains(&el.value().name()) {
                return true;
            }
        }
    }
    false
}
