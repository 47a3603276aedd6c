use crate::http::{FetchResult, HttpManager};
use crate::resilience::RequestKind;
use crate::robots::RobotsRules;
use crate::url::host_key;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Product token matched against robots.txt user-agent groups
pub const ROBOTS_AGENT: &str = "LeadHarvest";

/// Outcome of a robots.txt check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsDecision {
    Allowed,
    Disallowed,
    /// robots.txt could not be fetched because the host is penalized
    Deferred { retry_in: Duration },
    /// robots.txt timed out or the server failed; nothing is cached and the
    /// next check fetches it again
    Unavailable,
}

/// Robots.txt gate with a process-lifetime cache
///
/// Entries never expire; [`RobotsGate::clear`] is the only way to drop them.
/// Only definitive answers are cached: a robots.txt body, or a 4xx meaning
/// the site has none.
pub struct RobotsGate {
    http: Arc<HttpManager>,
    cache: RwLock<HashMap<String, RobotsRules>>,
}

impl RobotsGate {
    pub fn new(http: Arc<HttpManager>) -> Self {
        Self {
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn origin_key(url: &Url) -> Option<String> {
        host_key(url).map(|host| format!("{}://{}", url.scheme(), host))
    }

    /// Checks whether `url` may be fetched, fetching robots.txt on a miss
    pub async fn check(&self, url: &Url) -> RobotsDecision {
        let Some(key) = Self::origin_key(url) else {
            return RobotsDecision::Disallowed;
        };

        if let Some(rules) = self.cache.read().get(&key) {
            return Self::decide(rules, url);
        }

        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        let rules = match self.http.fetch(&robots_url, RequestKind::Scrape).await {
            FetchResult::Success(page) => RobotsRules::from_content(&page.body),
            FetchResult::Deferred { retry_in, .. } => {
                return RobotsDecision::Deferred { retry_in };
            }
            FetchResult::HttpError { status_code } if status_code >= 500 => {
                tracing::warn!(origin = %key, status = status_code, "robots.txt server error, skipping page for now");
                return RobotsDecision::Unavailable;
            }
            FetchResult::HttpError { status_code } => {
                tracing::debug!(origin = %key, status = status_code, "No robots.txt, allowing all");
                RobotsRules::allow_all()
            }
            FetchResult::NetworkError { error, .. } => {
                tracing::warn!(origin = %key, error = %error, "robots.txt fetch failed, skipping page for now");
                return RobotsDecision::Unavailable;
            }
        };

        let decision = Self::decide(&rules, url);
        self.cache.write().entry(key).or_insert(rules);
        decision
    }

    fn decide(rules: &RobotsRules, url: &Url) -> RobotsDecision {
        if rules.is_allowed(url.as_str(), ROBOTS_AGENT) {
            RobotsDecision::Allowed
        } else {
            RobotsDecision::Disallowed
        }
    }

    /// Drops every cached decision
    pub fn clear(&self) {
        self.cache.write().clear();
    }
}
