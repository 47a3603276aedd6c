//! Shared fixtures for the integration tests

use lead_harvest::config::Config;
use lead_harvest::crawler::{Coordinator, PortalConfig, PortalRegistry, SearchChain};
use lead_harvest::http::{HttpManager, HttpSettings};
use lead_harvest::lifecycle::{Emitter, EventSink, MemorySink};
use lead_harvest::resilience::CircuitBreaker;
use lead_harvest::scoring::{AdjustmentSnapshot, AdjustmentStore};
use lead_harvest::storage::{SharedStorage, SqliteStorage};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CANDIDATE_DETAIL: &str = r#"<html><head><title>Stellengesuch</title></head><body>
    <h1>Vertriebsprofi sucht neue Herausforderung</h1>
    <p>Ich suche eine neue Stelle im Außendienst. Mein Name ist Jonas Becker.</p>
    <p>Telefon: 0176 23456789, E-Mail: jonas.becker@example.com</p>
</body></html>"#;

pub const SECOND_CANDIDATE_DETAIL: &str = r#"<html><head><title>Stellengesuch</title></head><body>
    <h1>Kaufmännische Fachkraft auf Jobsuche</h1>
    <p>Ich suche Arbeit im Innendienst, Berufserfahrung 8 Jahre.</p>
    <p>Kontakt: 0151 98765432 oder lena.schulz@example.com</p>
</body></html>"#;

/// Everything a test needs to drive a coordinator against a mock server
pub struct Harness {
    pub config: Arc<Config>,
    pub breaker: Arc<CircuitBreaker>,
    pub http: Arc<HttpManager>,
    pub storage: SharedStorage,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    /// Harness whose HTTP requests give up after `request_timeout`
    pub fn with_timeout(request_timeout: Duration) -> Self {
        let storage = SqliteStorage::new_in_memory()
            .expect("Failed to create in-memory storage")
            .into_shared();
        let mut config = Config::with_database(":memory:");
        config.crawler.search_enabled = false;

        let breaker = Arc::new(CircuitBreaker::default());
        // One attempt per request keeps failure counts exact
        let settings = HttpSettings {
            max_retries: 1,
            retry_backoff: Duration::from_millis(10),
            request_timeout,
            ..HttpSettings::default()
        };
        let http = Arc::new(HttpManager::new(settings, Arc::clone(&breaker)).expect("Failed to build HTTP manager"));

        Self {
            config: Arc::new(config),
            breaker,
            http,
            storage,
            sink: Arc::new(MemorySink::new()),
        }
    }

    /// Adjusts the configuration used by coordinators built afterwards
    pub fn configure(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(Arc::make_mut(&mut self.config));
        self
    }

    pub fn emitter(&self) -> Emitter {
        Emitter::new(Arc::clone(&self.sink) as Arc<dyn EventSink>)
    }

    /// A coordinator with only the given portals and no search backends
    pub fn coordinator(&self, portals: Vec<PortalConfig>) -> Coordinator {
        let adjustments = Arc::new(AdjustmentStore::new(AdjustmentSnapshot::default()));
        Coordinator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.http),
            Arc::clone(&self.storage),
            adjustments,
        )
        .with_portals(PortalRegistry::new(portals))
        .with_search(SearchChain::default())
        .with_emitter(self.emitter())
    }
}

/// A single-page portal on the mock server with no crawl delay
pub fn mock_portal(server: &MockServer, delay_ms: u64) -> PortalConfig {
    let mut portal = PortalConfig::generic("mock", vec![format!("{}/s-stellengesuche/seite:{{page}}", server.uri())]);
    portal.max_pages = 1;
    portal.min_delay_ms = delay_ms;
    portal.max_delay_ms = delay_ms;
    portal.link_pattern = Some("/anzeige/".to_string());
    portal
}

/// Host key the circuit breaker uses for the mock server
pub fn mock_host(server: &MockServer) -> String {
    let url = url::Url::parse(&server.uri()).expect("Failed to parse mock server URI");
    format!(
        "{}:{}",
        url.host_str().expect("Mock server has no host"),
        url.port().expect("Mock server has no port")
    )
}

pub async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts a listing page linking to `/s-stellengesuche/anzeige/<id>` for each id
pub async fn mount_listing(server: &MockServer, ids: &[u32]) {
    let links: String = ids
        .iter()
        .map(|id| format!(r#"<li><a href="/s-stellengesuche/anzeige/{}">Gesuch {}</a></li>"#, id, id))
        .collect();
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/seite:1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<html><body><ul>{}</ul></body></html>", links))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body.to_string())
        .insert_header("content-type", "text/html; charset=utf-8")
}
