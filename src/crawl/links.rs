// src/crawl/links.rs
// =============================================================================
// This module extracts link-like references from rendered HTML.
//
// We use the `scraper` crate which:
// - Parses HTML into a DOM (Document Object Model)
// - Supports CSS selectors for finding elements
// - Is built on html5ever (Mozilla's HTML parser)
//
// Extraction only. Nothing here resolves, filters or classifies a reference;
// the prerender engine does that with the PathResolver, so fragments, data
// URIs and external links all come out of here verbatim.
//
// Rust concepts:
// - impl Iterator: `references` yields links while walking the DOM
// - IntoIterator: so a `Links` value works directly in a for loop
// - Slices: iterating the same links again is just another `.iter()`
// =============================================================================

use scraper::node::Element;
use scraper::{Html, Selector};
use std::sync::OnceLock;

// Elements whose `href` points at another resource
const HREF_ELEMENTS: &[&str] = &["a", "area", "link"];

// Elements whose `src` points at another resource
const SRC_ELEMENTS: &[&str] = &[
    "audio", "embed", "iframe", "img", "script", "source", "track", "video",
];

// Elements that may carry a responsive `srcset`
const SRCSET_ELEMENTS: &[&str] = &["img", "source"];

/// References found in one HTML document, in document order.
///
/// The sequence is finite and can be walked as many times as needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    hrefs: Vec<String>,
}

impl Links {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.hrefs.iter()
    }

    pub fn len(&self) -> usize {
        self.hrefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hrefs.is_empty()
    }
}

impl IntoIterator for Links {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.hrefs.into_iter()
    }
}

impl<'a> IntoIterator for &'a Links {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.hrefs.iter()
    }
}

/// Walks every href, src and srcset candidate of a parsed document, lazily
/// and in document order
pub fn references(document: &Html) -> impl Iterator<Item = String> + '_ {
    document
        .select(selector())
        .flat_map(|element| element_references(element.value()))
}

/// Extracts every href, src and srcset candidate from an HTML document
///
/// Example:
///   html = `<a href="/docs">Docs</a><img srcset="a.png 1x, b.png 2x">`
///   result = ["/docs", "a.png", "b.png"]
pub fn crawl(html: &str) -> Links {
    if html.is_empty() {
        return Links::default();
    }

    let document = Html::parse_document(html);
    Links {
        hrefs: references(&document).collect(),
    }
}

fn selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();

    // The selector is a constant and known to be valid
    SELECTOR.get_or_init(|| Selector::parse("[href], [src], [srcset]").unwrap())
}

// The references one element contributes, usually zero or one
fn element_references(element: &Element) -> Vec<String> {
    let mut hrefs = Vec::new();
    let name = element.name();

    if HREF_ELEMENTS.contains(&name) {
        push_reference(&mut hrefs, element.attr("href"));
    }

    if SRC_ELEMENTS.contains(&name) {
        push_reference(&mut hrefs, element.attr("src"));
    }

    if SRCSET_ELEMENTS.contains(&name) {
        if let Some(srcset) = element.attr("srcset") {
            for candidate in srcset.split(',') {
                // Each candidate is "<url> [descriptor]"
                push_reference(&mut hrefs, candidate.split_whitespace().next());
            }
        }
    }

    hrefs
}

fn push_reference(hrefs: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value.map(str::trim) {
        if !value.is_empty() {
            hrefs.push(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(html: &str) -> Vec<String> {
        crawl(html).into_iter().collect()
    }

    #[test]
    fn test_extract_anchor_links() {
        let html = r#"<a href="/about">About</a> <a href="https://www.rust-lang.org">Rust</a>"#;
        assert_eq!(collect(html), vec!["/about", "https://www.rust-lang.org"]);
    }

    #[test]
    fn test_extract_keeps_fragments_and_data_uris() {
        let html = r##"<a href="#top">Top</a><img src="data:image/png;base64,AAAA">"##;
        assert_eq!(collect(html), vec!["#top", "data:image/png;base64,AAAA"]);
    }

    #[test]
    fn test_extract_assets_in_document_order() {
        let html = r#"
            <link rel="stylesheet" href="/style.css">
            <script src="/app.js"></script>
            <img src="/a.png" srcset="/a-small.png 480w, /a-large.png 1080w">
            <a href="../up">Up</a>
        "#;
        assert_eq!(
            collect(html),
            vec![
                "/style.css",
                "/app.js",
                "/a.png",
                "/a-small.png",
                "/a-large.png",
                "../up"
            ]
        );
    }

    #[test]
    fn test_ignore_attributes_on_unrelated_elements() {
        let html = r#"<div href="/nope"></div><base href="/root/"><p src="/x"></p>"#;
        assert!(crawl(html).is_empty());
    }

    #[test]
    fn test_links_can_be_walked_twice() {
        let links = crawl(r#"<a href="/one">1</a><a href="/two">2</a>"#);
        let first: Vec<_> = links.iter().collect();
        let second: Vec<_> = (&links).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_references_are_lazy() {
        let document = Html::parse_document(
            r#"<a href="/first">1</a><a href="/second">2</a><a href="/third">3</a>"#,
        );
        let mut references = references(&document);

        assert_eq!(references.next().as_deref(), Some("/first"));
        assert_eq!(references.next().as_deref(), Some("/second"));
        assert_eq!(references.count(), 1);
    }
}
