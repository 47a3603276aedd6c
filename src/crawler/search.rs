//! Search backends and the primary → secondary fallback chain

use crate::config::Config;
use crate::http::{FetchError, FetchResult, HttpManager};
use crate::resilience::RequestKind;
use crate::url::host_key;
use async_trait::async_trait;
use parking_lot::Mutex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Google Custom Search JSON API endpoint
pub const GOOGLE_CSE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// DuckDuckGo's JavaScript-free results page
pub const DUCKDUCKGO_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// The API returns at most this many results per request
const GOOGLE_MAX_NUM: usize = 10;

/// Search-path errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("All {0} search API keys exhausted")]
    KeysExhausted(usize),

    #[error("Search backend {backend} request failed: {source}")]
    Fetch {
        backend: String,
        #[source]
        source: FetchError,
    },

    #[error("Unexpected response from {backend}: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("All search backends failed for '{query}': {last_error}")]
    AllBackendsFailed { query: String, last_error: String },
}

impl SearchError {
    /// Exhausted credentials end the run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KeysExhausted(_))
    }
}

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// One search query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Restriction window such as `d30` or `w2`
    pub date_restrict: Option<String>,
    pub num: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

/// A search engine the chain can fall back through
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> SearchResult<Vec<SearchHit>>;
}

/// Round-robin API key rotation with per-run retirement
///
/// A retired key is never handed out again for the life of the ring.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<String>,
    state: Mutex<KeyRingState>,
}

#[derive(Debug)]
struct KeyRingState {
    cursor: usize,
    retired: Vec<bool>,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        let retired = vec![false; keys.len()];
        Self {
            keys,
            state: Mutex::new(KeyRingState { cursor: 0, retired }),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next active key and its index, or `None` when all are retired
    pub fn next_key(&self) -> Option<(usize, &str)> {
        let mut state = self.state.lock();
        let n = self.keys.len();
        for offset in 0..n {
            let index = (state.cursor + offset) % n;
            if !state.retired[index] {
                state.cursor = (index + 1) % n;
                return Some((index, self.keys[index].as_str()));
            }
        }
        None
    }

    pub fn retire(&self, index: usize) {
        if let Some(flag) = self.state.lock().retired.get_mut(index) {
            *flag = true;
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().retired.iter().filter(|r| !**r).count()
    }
}

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    link: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

/// Google Custom Search JSON API
pub struct GoogleCse {
    http: Arc<HttpManager>,
    keys: KeyRing,
    cx: String,
    endpoint: Url,
}

impl GoogleCse {
    pub fn new(http: Arc<HttpManager>, keys: Vec<String>, cx: String) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            keys: KeyRing::new(keys),
            cx,
            endpoint: Url::parse(GOOGLE_CSE_ENDPOINT)?,
        })
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    fn request_url(&self, key: &str, request: &SearchRequest) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("key", key)
                .append_pair("cx", &self.cx)
                .append_pair("q", &request.query)
                .append_pair("num", &request.num.clamp(1, GOOGLE_MAX_NUM).to_string());
            if let Some(window) = &request.date_restrict {
                pairs.append_pair("dateRestrict", window);
            }
        }
        url
    }

    fn parse_response(&self, body: &str) -> SearchResult<Vec<SearchHit>> {
        let response: CseResponse = serde_json::from_str(body).map_err(|e| SearchError::InvalidResponse {
            backend: self.name().to_string(),
            message: e.to_string(),
        })?;
        Ok(response
            .items
            .into_iter()
            .map(|item| SearchHit {
                url: item.link,
                title: item.title,
                snippet: item.snippet,
            })
            .collect())
    }
}

#[async_trait]
impl SearchBackend for GoogleCse {
    fn name(&self) -> &str {
        "google"
    }

    /// Tries active keys in rotation until one answers
    ///
    /// HTTP 429 and 403 (the API's quota responses) retire the key for the
    /// rest of the run. Each key has its own breaker entry so a retired key
    /// does not penalize the others. A key whose breaker entry is open is
    /// skipped for this request; the backend fails only once every active key
    /// has been skipped.
    async fn search(&self, request: &SearchRequest) -> SearchResult<Vec<SearchHit>> {
        let host = host_key(&self.endpoint).unwrap_or_default();
        let mut skipped: HashSet<usize> = HashSet::new();
        loop {
            let Some((index, key)) = self.keys.next_key() else {
                return Err(SearchError::KeysExhausted(self.keys.len()));
            };
            let url = self.request_url(key, request);
            let breaker_key = format!("{}#key{}", host, index);

            match self.http.fetch_with_breaker_key(&url, RequestKind::Api, &breaker_key).await {
                FetchResult::Success(page) => return self.parse_response(&page.body),
                FetchResult::Deferred { host, retry_in } => {
                    let first_skip = skipped.insert(index);
                    if !first_skip || skipped.len() >= self.keys.active_count() {
                        return Err(SearchError::Fetch {
                            backend: self.name().to_string(),
                            source: FetchError::Deferred { host, retry_in },
                        });
                    }
                    tracing::debug!(key_index = index, "Search API key deferred, trying next key");
                }
                FetchResult::HttpError {
                    status_code: status @ (403 | 429),
                } => {
                    self.keys.retire(index);
                    tracing::warn!(
                        key_index = index,
                        status,
                        remaining = self.keys.active_count(),
                        "Search API key retired after quota response"
                    );
                }
                other => {
                    return match other.into_page(self.endpoint.as_str()) {
                        Ok(page) => self.parse_response(&page.body),
                        Err(source) => Err(SearchError::Fetch {
                            backend: self.name().to_string(),
                            source,
                        }),
                    };
                }
            }
        }
    }
}

/// DuckDuckGo HTML results page
pub struct DuckDuckGoHtml {
    http: Arc<HttpManager>,
    endpoint: Url,
}

impl DuckDuckGoHtml {
    pub fn new(http: Arc<HttpManager>) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            endpoint: Url::parse(DUCKDUCKGO_HTML_ENDPOINT)?,
        })
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// Parses result links and snippets from a DuckDuckGo HTML page
///
/// Redirect links (`/l/?uddg=…`) are unwrapped to their target.
pub fn parse_duckduckgo_results(html: &str, base: &Url, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for result in document.select(&result_sel) {
        let Some(anchor) = result.select(&link_sel).next() else {
            continue;
        };
        let Some(target) = anchor.value().attr("href").and_then(|href| unwrap_redirect(href, base)) else {
            continue;
        };
        let text = |s: String| {
            let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
            (!s.is_empty()).then_some(s)
        };
        hits.push(SearchHit {
            url: target,
            title: text(anchor.text().collect()),
            snippet: result.select(&snippet_sel).next().and_then(|el| text(el.text().collect())),
        });
        if hits.len() >= limit {
            break;
        }
    }
    hits
}

fn unwrap_redirect(href: &str, base: &Url) -> Option<String> {
    let url = base.join(href).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[async_trait]
impl SearchBackend for DuckDuckGoHtml {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, request: &SearchRequest) -> SearchResult<Vec<SearchHit>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("q", &request.query);

        let page = self
            .http
            .get_text(&url, RequestKind::Scrape)
            .await
            .map_err(|source| SearchError::Fetch {
                backend: self.name().to_string(),
                source,
            })?;
        Ok(parse_duckduckgo_results(&page.body, &url, request.num.max(1)))
    }
}

/// Hits together with the backend that produced them
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub backend: String,
    pub hits: Vec<SearchHit>,
}

/// Ordered list of search backends tried in sequence
#[derive(Clone, Default)]
pub struct SearchChain {
    backends: Vec<Arc<dyn SearchBackend>>,
}

impl SearchChain {
    pub fn new(backends: Vec<Arc<dyn SearchBackend>>) -> Self {
        Self { backends }
    }

    /// Builds the chain in the configured backend order
    ///
    /// Google is left out when no keys or no engine id are configured.
    pub fn from_config(config: &Config, http: &Arc<HttpManager>) -> Self {
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
        for name in &config.search.backends {
            match name.as_str() {
                "google" => match (&config.search.google_cx, config.search.google_api_keys.is_empty()) {
                    (Some(cx), false) => {
                        match GoogleCse::new(Arc::clone(http), config.search.google_api_keys.clone(), cx.clone()) {
                            Ok(google) => backends.push(Arc::new(google)),
                            Err(e) => tracing::warn!(error = %e, "Invalid Google endpoint"),
                        }
                    }
                    _ => tracing::warn!("Google search configured without keys or cx, skipping"),
                },
                "duckduckgo" => match DuckDuckGoHtml::new(Arc::clone(http)) {
                    Ok(ddg) => backends.push(Arc::new(ddg)),
                    Err(e) => tracing::warn!(error = %e, "Invalid DuckDuckGo endpoint"),
                },
                other => tracing::warn!(backend = other, "Unknown search backend, skipping"),
            }
        }
        Self::new(backends)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Runs the query through each backend until one succeeds
    ///
    /// If every backend fails and one of the failures was exhausted
    /// credentials, that fatal error is returned.
    pub async fn search(&self, request: &SearchRequest) -> SearchResult<SearchOutcome> {
        let mut exhausted = None;
        let mut last_error = String::from("no search backends configured");

        for backend in &self.backends {
            match backend.search(request).await {
                Ok(hits) => {
                    tracing::debug!(backend = backend.name(), query = %request.query, hits = hits.len(), "Search succeeded");
                    return Ok(SearchOutcome {
                        backend: backend.name().to_string(),
                        hits,
                    });
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), query = %request.query, error = %e, "Search backend failed, trying next");
                    if let SearchError::KeysExhausted(n) = e {
                        exhausted = Some(n);
                    }
                    last_error = e.to_string();
                }
            }
        }

        match exhausted {
            Some(n) => Err(SearchError::KeysExhausted(n)),
            None => Err(SearchError::AllBackendsFailed {
                query: request.query.clone(),
                last_error,
            }),
        }
    }
}
