use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static PRIMARY_LABELS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"label[for^="query-"], label[for^="path-"], label[for^="header-"], label[for^="body-"], label[for^="object-"]"#,
    )
    .unwrap()
});
static CONTAINER_SPANS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[class*="Param-name"]"#).unwrap());
static CODE_BLOCKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("pre, code").unwrap());
static TITLES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1, h2, h3").unwrap());
static METHOD_BADGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span, div, code").unwrap());

static LOOSE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(query|path|header|body|object)-[^\s_]+_\S+$").unwrap());
static STATUS_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:response\s+)?([1-5]\d\d)\b").unwrap());
static ERROR_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(error|errors|default)\b").unwrap());
static RESPONSE_BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bresponse\s+body\b").unwrap());
static METHOD_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\s+(https?://[^\s"'<>)]+)"#).unwrap()
});
static METHOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)$").unwrap());
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>)]+"#).unwrap());

/// Attributes that may carry an attribute path in the fallback pass.
const PATH_ATTRS: &[&str] = &["for", "id", "name", "data-path", "data-for"];
/// Container names a flat response body never lists as fields.
const SPAN_SKIP: &[&str] = &["data", "query", "message"];
/// Endpoint token for paths synthesized from response body spans.
const SPAN_TOKEN: &str = "responsebody";
const TITLE_SKIP: &[&str] = &["getting started", "guide", "tutorial", "overview"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Label,
    ContainerSpan,
}

/// One documented field as scraped from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawElement {
    pub attribute_path: String,
    pub display_name: String,
    /// Badge text next to the name (type, cardinality, required).
    pub local_context: String,
    /// Natural-language description from the same row.
    pub description: String,
    pub kind: ElementKind,
    /// Nearest preceding status-code section marker.
    pub status_heading: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `label[for]` attributes plus response container spans.
    Primary,
    /// Any element carrying a location-prefixed path in a known attribute.
    Fallback,
}

/// Page-level facts recovered from markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    /// Every status marker on the page, in document order.
    pub status_markers: Vec<String>,
    /// Code blocks that look like JSON examples.
    pub examples: Vec<String>,
}

impl PageMeta {
    pub fn has_error_marker(&self) -> bool {
        self.status_markers
            .iter()
            .any(|m| !matches!(parse_status(m), Some(200..=299)))
    }
}

/// Status code from a section marker, if it carries one.
pub fn parse_status(marker: &str) -> Option<u16> {
    STATUS_HEADING_RE
        .captures(marker.trim())
        .and_then(|c| c[1].parse().ok())
}

pub fn scan(doc: &Html, strategy: Strategy) -> Vec<RawElement> {
    let mut elements = Vec::new();
    let mut spans = Vec::new();
    let mut status: Option<String> = None;

    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if let Some(marker) = status_marker(&el) {
            status = Some(marker);
            continue;
        }

        match strategy {
            Strategy::Primary => {
                if PRIMARY_LABELS.matches(&el) {
                    if let Some(path) = el.value().attr("for") {
                        elements.push(label_element(&el, path, status.clone()));
                    }
                } else if CONTAINER_SPANS.matches(&el) {
                    let name = collapse_whitespace(&el.text().collect::<String>());
                    if !name.is_empty() && !name.contains(char::is_whitespace) {
                        let (local_context, description) = sibling_context(&el);
                        spans.push(RawElement {
                            attribute_path: String::new(),
                            display_name: name,
                            local_context,
                            description,
                            kind: ElementKind::ContainerSpan,
                            status_heading: status.clone(),
                        });
                    }
                }
            }
            Strategy::Fallback => {
                let path = PATH_ATTRS
                    .iter()
                    .filter_map(|a| el.value().attr(a))
                    .find(|v| LOOSE_PATH_RE.is_match(v));
                if let Some(path) = path {
                    if el.value().name() == "label" {
                        elements.push(label_element(&el, path, status.clone()));
                    } else {
                        elements.push(row_element(&el, path, status.clone()));
                    }
                }
            }
        }
    }

    // a span only declares a container when labels actually live under it;
    // its path borrows the endpoint token those labels use
    let containers: HashMap<&str, &str> = elements
        .iter()
        .filter_map(|e| e.attribute_path.strip_prefix("object-"))
        .filter_map(|rest| {
            let (endpoint, tail) = rest.split_once('_')?;
            Some((tail.split('_').next().unwrap_or(tail), endpoint))
        })
        .collect();
    let spans: Vec<RawElement> = spans
        .into_iter()
        .filter_map(|mut s| {
            let endpoint = containers.get(s.display_name.as_str())?;
            s.attribute_path = format!("object-{}_{}", endpoint, s.display_name);
            Some(s)
        })
        .collect();
    elements.extend(spans);
    elements
}

/// `Param-name` spans under a "Response body" heading, for pages that list
/// the success body as flat names without any `object-*` labels.
pub fn response_body_spans(doc: &Html) -> Vec<RawElement> {
    let mut open: Option<u8> = None;
    let mut seen = HashSet::new();
    let mut elements = Vec::new();

    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if let Some(level) = heading_level(&el) {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if RESPONSE_BODY_RE.is_match(&text) {
                open = Some(level);
            } else if open.is_some_and(|l| level <= l)
                && !matches!(parse_status(&text), Some(200..=299))
            {
                open = None;
            }
            continue;
        }
        if open.is_none() || !CONTAINER_SPANS.matches(&el) {
            continue;
        }

        let name = collapse_whitespace(&el.text().collect::<String>());
        if name.is_empty()
            || name.contains(char::is_whitespace)
            || SPAN_SKIP.contains(&name.to_lowercase().as_str())
            || !seen.insert(name.clone())
        {
            continue;
        }
        let (local_context, description) = sibling_context(&el);
        elements.push(RawElement {
            attribute_path: format!("object-{}_{}", SPAN_TOKEN, name),
            display_name: name,
            local_context,
            description,
            kind: ElementKind::Label,
            status_heading: None,
        });
    }
    elements
}

fn heading_level(el: &ElementRef) -> Option<u8> {
    match el.value().name() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn label_element(el: &ElementRef, path: &str, status: Option<String>) -> RawElement {
    let (local_context, description) = sibling_context(el);
    RawElement {
        attribute_path: path.to_string(),
        display_name: collapse_whitespace(&el.text().collect::<String>()),
        local_context,
        description,
        kind: ElementKind::Label,
        status_heading: status,
    }
}

/// A non-label element carrying a path: treat its children as the row.
fn row_element(el: &ElementRef, path: &str, status: Option<String>) -> RawElement {
    let children: Vec<ElementRef> = el.children().filter_map(ElementRef::wrap).collect();
    let name_child = children.iter().position(|c| {
        let t = collapse_whitespace(&c.text().collect::<String>());
        !t.is_empty() && t.len() < 64 && !t.contains(char::is_whitespace)
    });

    let display_name = match name_child {
        Some(i) => collapse_whitespace(&children[i].text().collect::<String>()),
        None => path.rsplit('_').next().unwrap_or(path).to_string(),
    };
    let rest = children
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != name_child)
        .map(|(_, c)| *c);
    let (local_context, description) = partition_context(rest);

    RawElement {
        attribute_path: path.to_string(),
        display_name,
        local_context,
        description,
        kind: ElementKind::Label,
        status_heading: status,
    }
}

fn sibling_context(el: &ElementRef) -> (String, String) {
    partition_context(el.next_siblings().filter_map(ElementRef::wrap))
}

/// Split row elements into badge text and prose.
fn partition_context<'a>(elements: impl Iterator<Item = ElementRef<'a>>) -> (String, String) {
    let mut badges = Vec::new();
    let mut prose = Vec::new();
    for e in elements {
        let text = collapse_whitespace(&e.text().collect::<String>());
        if text.is_empty() {
            continue;
        }
        if is_descriptive(&e) {
            prose.push(text);
        } else {
            badges.push(text);
        }
    }
    (badges.join(" "), prose.join(" "))
}

fn is_descriptive(el: &ElementRef) -> bool {
    if el.value().name() == "p" {
        return true;
    }
    if el
        .value()
        .attr("class")
        .is_some_and(|c| c.contains("desc") || c.contains("markdown"))
    {
        return true;
    }
    el.descendants()
        .filter_map(ElementRef::wrap)
        .any(|d| d.value().name() == "p")
}

fn status_marker(el: &ElementRef) -> Option<String> {
    if let Some(v) = el.value().attr("data-status") {
        return Some(v.trim().to_string());
    }
    let tag = el.value().name();
    let heading_like = matches!(
        tag,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "button" | "summary"
    );
    if !heading_like {
        return None;
    }
    let text = collapse_whitespace(&el.text().collect::<String>());
    if STATUS_HEADING_RE.is_match(&text) || ERROR_HEADING_RE.is_match(&text) {
        Some(text)
    } else {
        None
    }
}

pub fn page_meta(doc: &Html) -> PageMeta {
    let mut meta = PageMeta::default();

    meta.title = doc.select(&TITLES).find_map(|h| {
        let t = collapse_whitespace(&h.text().collect::<String>());
        let lower = t.to_lowercase();
        let usable = !t.is_empty()
            && t.len() < 80
            && !TITLE_SKIP.iter().any(|s| lower.contains(s))
            && status_marker(&h).is_none();
        usable.then_some(t)
    });

    for block in doc.select(&CODE_BLOCKS) {
        let text: String = block.text().collect();
        if meta.method.is_none() || meta.url.is_none() {
            if let Some(caps) = METHOD_URL_RE.captures(&text) {
                meta.method.get_or_insert_with(|| caps[1].to_string());
                meta.url.get_or_insert_with(|| caps[2].to_string());
            }
        }
        let trimmed = text.trim();
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && !meta.examples.iter().any(|e| e == trimmed)
        {
            meta.examples.push(trimmed.to_string());
        }
    }

    if meta.method.is_none() {
        meta.method = doc.select(&METHOD_BADGES).find_map(|b| {
            let t = collapse_whitespace(&b.text().collect::<String>());
            METHOD_RE.is_match(&t).then_some(t)
        });
    }
    if meta.url.is_none() {
        meta.url = doc.select(&CODE_BLOCKS).find_map(|b| {
            let t: String = b.text().collect();
            URL_RE.find(&t).map(|m| m.as_str().to_string())
        });
    }

    for node in doc.root_element().descendants() {
        if let Some(marker) = ElementRef::wrap(node).and_then(|el| status_marker(&el)) {
            meta.status_markers.push(marker);
        }
    }

    meta
}

pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}
