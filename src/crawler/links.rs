//! Listing-page link extraction
//!
//! Pulls candidate detail links out of a portal listing page using the
//! portal's anchor selector and path pattern.

use scraper::{Html, Selector};
use url::Url;

/// Extracts absolute detail-page URLs from a listing page
///
/// # Link Rules
///
/// **Include:** anchors matching `selector` whose resolved path contains
/// `pattern` (all anchors when no pattern is set).
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:` and `data:` hrefs
/// - fragment-only anchors
/// - non-HTTP(S) URLs after resolution
/// - links to the listing page itself
///
/// Duplicates are dropped; document order is kept.
///
/// # Arguments
///
/// * `html` - Listing page body
/// * `base_url` - URL the listing was fetched from
/// * `selector` - CSS selector for candidate anchors
/// * `pattern` - Substring the link path must contain
pub fn extract_detail_links(html: &str, base_url: &Url, selector: &str, pattern: Option<&str>) -> Vec<Url> {
    let Ok(selector) = Selector::parse(selector) else {
        tracing::warn!(selector, "Invalid link selector");
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut links: Vec<Url> = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_link(href, base_url) else {
            continue;
        };
        if pattern.is_some_and(|p| !url.path().contains(p)) {
            continue;
        }
        if same_page(&url, base_url) || links.contains(&url) {
            continue;
        }
        links.push(url);
    }
    links
}

/// Inner HTML of the first element matching `selector`
pub fn scoped_fragment(html: &str, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    let fragment = document.select(&selector).next()?.html();
    Some(fragment)
}

/// Resolves an href against the base URL, rejecting non-page links
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn same_page(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.path() == b.path() && a.query() == b.query()
}
