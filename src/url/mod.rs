//! URL handling module for Lead-Harvest
//!
//! Provides the URL normalization used as the `urls_seen` dedup key and the
//! host extraction used to key circuit-breaker and concurrency state.

mod domain;
mod normalize;

pub use domain::{extract_domain, host_key};
pub use normalize::normalize_url;

/// Normalizes a URL string into its dedup key
///
/// Falls back to the trimmed input when the URL cannot be parsed, so that
/// even malformed links are recorded once and never refetched.
pub fn seen_key(url_str: &str) -> String {
    match normalize_url(url_str) {
        Ok(url) => url.to_string(),
        Err(_) => url_str.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_key_collapses_variants() {
        let a = seen_key("https://www.Portal.de/s-stellengesuche/anzeige/123?utm_source=x#top");
        let b = seen_key("https://portal.de/s-stellengesuche/anzeige/123/");
        assert_eq!(a, b);
    }

    #[test]
    fn test_seen_key_keeps_unparseable_input() {
        assert_eq!(seen_key("  not a url "), "not a url");
    }
}
