use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]+(?:/[^?#]*)?/reference/([a-zA-Z0-9][a-zA-Z0-9_-]*)/?$").unwrap()
});

/// Reference slugs that document concepts rather than an operation.
const INFORMATIONAL: &[&str] = &[
    "overview",
    "overview-api",
    "introduction",
    "getting-started",
    "authentication",
    "security",
    "errors",
    "rate-limits",
    "pagination",
    "changelog",
    "when-interfacing",
    "how-can-i-make",
];

/// Fetch a `urlset` sitemap and return (url, endpoint_id) pairs for the
/// operation pages it lists.
pub async fn discover(client: &reqwest::Client, sitemap_url: &str) -> Result<Vec<(String, String)>> {
    info!("Fetching sitemap: {}", sitemap_url);
    let xml = client
        .get(sitemap_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to fetch sitemap")?;

    let all_urls = parse_urlset(&xml)?;
    info!("Total URLs in sitemap: {}", all_urls.len());

    let pages = reference_pages(all_urls);
    info!("Reference pages after filtering: {}", pages.len());
    Ok(pages)
}

/// Keep `/reference/<slug>` URLs, drop informational pages and duplicates.
pub fn reference_pages(urls: impl IntoIterator<Item = String>) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter_map(|url| {
            let slug = REFERENCE_RE.captures(&url)?.get(1)?.as_str().to_string();
            Some((url, slug))
        })
        .filter(|(_, slug)| !is_informational(slug))
        .filter(|(_, slug)| seen.insert(slug.clone()))
        .collect()
}

fn is_informational(slug: &str) -> bool {
    let lower = slug.to_ascii_lowercase();
    INFORMATIONAL.iter().any(|s| lower == *s || lower.starts_with(&format!("{}-", s)))
}

/// Endpoint id for an explicitly added URL: its last path segment.
pub fn endpoint_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
}

/// Parse a urlset XML and return all <loc> URLs.
fn parse_urlset(xml: &str) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut in_url = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.name().as_ref() {
                b"url" => in_url = true,
                b"loc" if in_url => in_loc = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(e)) if in_loc => {
                urls.push(e.unescape()?.trim().to_string());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.name().as_ref() {
                b"loc" => in_loc = false,
                b"url" => in_url = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(urls)
}
