use url::Url;

/// Extracts the lowercase host from a URL, without a leading `www.`
///
/// # Examples
///
/// ```
/// use url::Url;
/// use lead_harvest::url::extract_domain;
///
/// let url = Url::parse("https://www.Kleinanzeigen.de/s-stellengesuche").unwrap();
/// assert_eq!(extract_domain(&url), Some("kleinanzeigen.de".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| {
        let host = h.to_lowercase();
        match host.strip_prefix("www.") {
            Some(rest) => rest.to_string(),
            None => host,
        }
    })
}

/// Key used for per-host breaker and semaphore state
///
/// Includes an explicit port so that two services on one address are
/// tracked independently.
pub fn host_key(url: &Url) -> Option<String> {
    let domain = extract_domain(url)?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", domain, port),
        None => domain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple_domain() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_strips_www_and_lowercases() {
        let url = Url::parse("https://WWW.Markt.DE/stellengesuche").unwrap();
        assert_eq!(extract_domain(&url), Some("markt.de".to_string()));
    }

    #[test]
    fn test_extract_keeps_other_subdomains() {
        let url = Url::parse("https://jobs.example.com/post").unwrap();
        assert_eq!(extract_domain(&url), Some("jobs.example.com".to_string()));
    }

    #[test]
    fn test_host_key_includes_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080/page").unwrap();
        assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));

        let url = Url::parse("https://foo.de/page").unwrap();
        assert_eq!(host_key(&url), Some("foo.de".to_string()));
    }
}
