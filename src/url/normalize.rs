use crate::UrlError;
use url::Url;

/// Query parameters that never change which ad a URL points at
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "source",
    "sid",
    "pos",
    "position",
];

/// Normalizes a URL into the form used for `urls_seen` dedup
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host and remove a `www.` prefix
/// 3. Remove dot segments, duplicate slashes and a trailing slash
/// 4. Remove the fragment
/// 5. Remove tracking query parameters and sort the rest
///
/// The scheme is kept as-is: portals that serve plain http are fetched
/// over http.
///
/// # Examples
///
/// ```
/// use lead_harvest::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/anzeige/?utm_source=x").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/anzeige");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or(UrlError::MissingDomain)?
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params.iter());
        }
    }

    Ok(url)
}

/// Resolves dot segments, collapses empty segments and drops a trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();
    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_http_scheme() {
        let result = normalize_url("http://127.0.0.1:4000/anzeige/").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:4000/anzeige");
    }

    #[test]
    fn test_host_case_and_www_collapse() {
        let result = normalize_url("https://WWW.Kleinanzeigen.DE/s-stellengesuche/Seite:2").unwrap();
        assert_eq!(result.as_str(), "https://kleinanzeigen.de/s-stellengesuche/Seite:2");
    }

    #[test]
    fn test_root_keeps_single_slash() {
        assert_eq!(normalize_url("https://portal.de").unwrap().as_str(), "https://portal.de/");
        assert_eq!(normalize_url("https://portal.de/").unwrap().as_str(), "https://portal.de/");
    }

    #[test]
    fn test_path_cleanup() {
        let result = normalize_url("https://portal.de//jobs/./gesuche/../anzeige//42/#kontakt").unwrap();
        assert_eq!(result.as_str(), "https://portal.de/jobs/anzeige/42");
    }

    #[test]
    fn test_parent_segment_at_root_is_dropped() {
        let result = normalize_url("https://portal.de/../anzeige/7").unwrap();
        assert_eq!(result.as_str(), "https://portal.de/anzeige/7");
    }

    #[test]
    fn test_tracking_params_removed_and_rest_sorted() {
        let result = normalize_url(
            "https://portal.de/suche?utm_campaign=x&q=vertrieb&fbclid=1&ort=berlin&sid=abc",
        )
        .unwrap();
        assert_eq!(result.as_str(), "https://portal.de/suche?ort=berlin&q=vertrieb");
    }

    #[test]
    fn test_only_tracking_params_drops_query() {
        let result = normalize_url("https://portal.de/anzeige/9?utm_source=a&gclid=b&pos=3").unwrap();
        assert_eq!(result.as_str(), "https://portal.de/anzeige/9");
    }

    #[test]
    fn test_portal_ad_id_param_kept() {
        let result = normalize_url("https://portal.de/anzeige?adId=991&pos=4").unwrap();
        assert_eq!(result.as_str(), "https://portal.de/anzeige?adId=991");
    }

    #[test]
    fn test_rejects_non_http_and_garbage() {
        assert!(matches!(
            normalize_url("mailto:jobs@portal.de"),
            Err(UrlError::InvalidScheme(_))
        ));
        assert!(normalize_url("not a url").is_err());
    }
}
