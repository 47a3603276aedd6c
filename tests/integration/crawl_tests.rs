//! End-to-end portal crawls against a mock portal
//!
//! Each test serves a listing page and detail pages from wiremock and drives
//! a `Coordinator` directly, without the run controller.

use crate::support::{
    html, mock_host, mock_portal, mount_listing, mount_robots, Harness, CANDIDATE_DETAIL, SECOND_CANDIDATE_DETAIL,
};
use async_trait::async_trait;
use lead_harvest::crawler::{Coordinator, CrawlControl};
use lead_harvest::extract::PageContext;
use lead_harvest::lead::{Lead, LeadType, TAG_MANUAL_REVIEW};
use lead_harvest::lifecycle::{CounterSnapshot, EventCategory};
use lead_harvest::http::{FetchResult, HttpManager, HttpSettings};
use lead_harvest::resilience::{Backoff, BreakerPolicy, CircuitBreaker, Outcome, RequestKind};
use lead_harvest::robots::{RobotsDecision, RobotsGate};
use lead_harvest::state::Admission;
use lead_harvest::storage::{ExternalResult, ExternalStore, LeadWriter, Storage};
use lead_harvest::url::seen_key;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run_to_end(coordinator: Coordinator) -> CounterSnapshot {
    let control = CrawlControl::new();
    Arc::new(coordinator)
        .run(control.token())
        .await
        .expect("Crawl failed")
}

#[tokio::test]
async fn test_portal_crawl_stores_leads() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;
    mount_listing(&server, &[1, 2]).await;

    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/1"))
        .respond_with(html(CANDIDATE_DETAIL))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/2"))
        .respond_with(html(SECOND_CANDIDATE_DETAIL))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let counters = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;

    // Listing page plus two detail pages
    assert_eq!(counters.pages_fetched, 3);
    assert_eq!(counters.leads_accepted, 2);
    assert_eq!(counters.errors, 0);

    let storage = harness.storage.lock();
    assert_eq!(storage.count_leads().unwrap(), 2);

    let jonas = storage
        .find_lead_by_email("jonas.becker@example.com")
        .unwrap()
        .expect("First lead missing");
    assert_eq!(jonas.phone.as_deref(), Some("+4917623456789"));
    assert_eq!(jonas.lead_type, LeadType::Candidate);
    assert_eq!(jonas.source_portal.as_deref(), Some("mock"));

    let detail = format!("{}/s-stellengesuche/anzeige/1", server.uri());
    assert!(storage.is_url_seen(&seen_key(&detail)).unwrap());
}

#[tokio::test]
async fn test_second_run_skips_seen_detail_pages() {
    let server = MockServer::start().await;
    mount_listing(&server, &[1, 2]).await;

    // Detail pages must be fetched exactly once across both runs
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/1"))
        .respond_with(html(CANDIDATE_DETAIL))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/2"))
        .respond_with(html(SECOND_CANDIDATE_DETAIL))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let first = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;
    let second = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;

    assert_eq!(first.leads_accepted, 2);
    assert_eq!(second.leads_accepted, 0);
    // Only the listing page is fetched again
    assert_eq!(second.pages_fetched, 1);
    assert_eq!(harness.storage.lock().count_leads().unwrap(), 2);
}

#[tokio::test]
async fn test_candidate_path_wins_over_employer_wording() {
    let server = MockServer::start().await;
    mount_listing(&server, &[7]).await;

    // Employer boilerplate copied into a job-seeker ad
    let body = r#"<html><body>
        <h1>Vertriebsmitarbeiter (m/w/d)</h1>
        <p>Wir bieten Zuverlässigkeit und Erfahrung. Jetzt bewerben lohnt sich!</p>
        <p>Erreichbar unter 0160 55512345 oder tobias.kern@example.com</p>
    </body></html>"#;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/7"))
        .respond_with(html(body))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let counters = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;
    assert_eq!(counters.leads_accepted, 1);

    let lead = harness
        .storage
        .lock()
        .find_lead_by_email("tobias.kern@example.com")
        .unwrap()
        .expect("Lead missing");
    assert_eq!(lead.lead_type, LeadType::Candidate);
    assert!(!lead.has_tag(TAG_MANUAL_REVIEW));
}

#[tokio::test]
async fn test_employer_ad_with_contact_goes_to_manual_review() {
    let harness = Harness::new();
    let coordinator = harness.coordinator(Vec::new());

    let body = r#"<html><body>
        <h1>Außendienstmitarbeiter (m/w/d) gesucht</h1>
        <p>Wir bieten ein starkes Team. Jetzt bewerben bei Frau Weber:</p>
        <p>0171 44455667, karriere.weber@example.com</p>
    </body></html>"#;
    let ctx = PageContext::new("https://jobs.example.com/jobs/4711");

    let report = coordinator
        .process_page(body, &ctx)
        .await
        .expect("Processing failed")
        .expect("Employer ad with contact should be kept");

    let lead = harness
        .storage
        .lock()
        .get_lead(report.outcome.id())
        .unwrap()
        .expect("Lead missing");
    assert_eq!(lead.lead_type, LeadType::EmployerAd);
    assert!(lead.has_tag(TAG_MANUAL_REVIEW));
}

#[tokio::test]
async fn test_robots_disallow_blocks_detail_page() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /s-stellengesuche/anzeige/2").await;
    mount_listing(&server, &[1, 2]).await;

    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/1"))
        .respond_with(html(CANDIDATE_DETAIL))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/2"))
        .respond_with(html(SECOND_CANDIDATE_DETAIL))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let counters = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;

    assert_eq!(counters.blocked, 1);
    assert_eq!(counters.leads_accepted, 1);
    assert_eq!(harness.sink.count(EventCategory::Security), 1);
}

#[tokio::test]
async fn test_penalized_host_receives_no_requests() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness.breaker.record(
        &mock_host(&server),
        RequestKind::Scrape,
        &Outcome::Penalizing {
            reason: "HTTP 429".to_string(),
        },
        Instant::now(),
    );

    let counters = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;

    assert_eq!(counters.pages_fetched, 0);
    assert!(counters.deferred >= 1);
    assert_eq!(harness.storage.lock().count_leads().unwrap(), 0);
}

#[tokio::test]
async fn test_rate_limited_listing_opens_breaker_for_next_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/seite:1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let first = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;
    assert_eq!(first.blocked, 1);
    assert!(harness.breaker.is_open(&mock_host(&server), Instant::now()));

    // Still inside the penalty window: the listing is not requested again
    let second = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;
    assert_eq!(second.pages_fetched, 0);
    assert!(second.deferred >= 1);
}

#[tokio::test]
async fn test_consecutive_timeouts_defer_remaining_pages() {
    let server = MockServer::start().await;
    mount_listing(&server, &[1, 2, 3, 4]).await;

    let slow = html(CANDIDATE_DETAIL).set_delay(Duration::from_secs(2));
    for id in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/s-stellengesuche/anzeige/{}", id)))
            .respond_with(slow.clone())
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/4"))
        .respond_with(html(SECOND_CANDIDATE_DETAIL))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::with_timeout(Duration::from_millis(200));
    let counters = run_to_end(harness.coordinator(vec![mock_portal(&server, 0)])).await;

    assert_eq!(counters.timeouts, 3);
    assert_eq!(counters.deferred, 1);
    assert_eq!(counters.leads_accepted, 0);
    assert!(harness.breaker.is_open(&mock_host(&server), Instant::now()));

    // Timed-out pages stay eligible for a later run
    let detail = format!("{}/s-stellengesuche/anzeige/1", server.uri());
    assert!(!harness.storage.lock().is_url_seen(&seen_key(&detail)).unwrap());
}

#[derive(Default)]
struct RecordingStore {
    emails: Mutex<Vec<String>>,
}

#[async_trait]
impl ExternalStore for RecordingStore {
    fn name(&self) -> &str {
        "crm"
    }

    async fn write_lead(&self, lead: &Lead) -> ExternalResult<String> {
        let email = lead.email.clone().unwrap_or_default();
        self.emails.lock().push(email.clone());
        Ok(format!("crm-{}", email))
    }
}

#[tokio::test]
async fn test_external_writer_receives_crawled_leads() {
    let server = MockServer::start().await;
    mount_listing(&server, &[1]).await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/1"))
        .respond_with(html(CANDIDATE_DETAIL))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let external = Arc::new(RecordingStore::default());
    let writer = LeadWriter::local(Arc::clone(&harness.storage)).with_external(external.clone());
    let coordinator = harness.coordinator(vec![mock_portal(&server, 0)]).with_writer(writer);

    let counters = run_to_end(coordinator).await;
    assert_eq!(counters.leads_accepted, 1);
    assert_eq!(external.emails.lock().as_slice(), ["jonas.becker@example.com"]);

    // The local copy exists and is already marked as synced
    let storage = harness.storage.lock();
    assert_eq!(storage.count_leads().unwrap(), 1);
    assert_eq!(storage.count_unsynced().unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_trial_does_not_strand_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/langsam"))
        .respond_with(html(CANDIDATE_DETAIL).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/seite:1"))
        .respond_with(html("<html><body></body></html>"))
        .mount(&server)
        .await;

    let short = Backoff::new(Duration::from_millis(50), Duration::from_millis(200), u32::MAX);
    let policy = BreakerPolicy {
        scrape: short,
        api: short,
        timeout_threshold: 3,
    };
    let breaker = Arc::new(CircuitBreaker::new(policy));
    let settings = HttpSettings {
        max_retries: 1,
        ..HttpSettings::default()
    };
    let http = HttpManager::new(settings, Arc::clone(&breaker)).expect("Failed to build HTTP manager");

    let host = mock_host(&server);
    let penalty = Outcome::Penalizing {
        reason: "HTTP 429".to_string(),
    };
    breaker.record(&host, RequestKind::Scrape, &penalty, Instant::now());
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The trial request is abandoned before any outcome is recorded
    let slow = url::Url::parse(&format!("{}/s-stellengesuche/langsam", server.uri())).unwrap();
    let cancelled = tokio::time::timeout(Duration::from_millis(200), http.fetch(&slow, RequestKind::Scrape)).await;
    assert!(cancelled.is_err());

    assert_eq!(breaker.admit(&host, Instant::now()), Admission::Trial);
    breaker.release_trial(&host);

    let listing = url::Url::parse(&format!("{}/s-stellengesuche/seite:1", server.uri())).unwrap();
    let result = http.fetch(&listing, RequestKind::Scrape).await;
    assert!(matches!(result, FetchResult::Success(_)));
    assert!(!breaker.is_open(&host, Instant::now()));
    assert_eq!(breaker.host_state(&host).unwrap().failures, 0);
}

#[tokio::test]
async fn test_robots_timeout_is_not_cached_as_allow_all() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_robots(&server, "User-agent: *\nDisallow: /anzeige/").await;

    let harness = Harness::with_timeout(Duration::from_millis(200));
    let gate = RobotsGate::new(Arc::clone(&harness.http));
    let page = url::Url::parse(&format!("{}/anzeige/5", server.uri())).unwrap();

    assert_eq!(gate.check(&page).await, RobotsDecision::Unavailable);
    assert_eq!(gate.check(&page).await, RobotsDecision::Disallowed);
}

#[tokio::test]
async fn test_robots_server_error_skips_until_recovered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    let harness = Harness::new();
    let gate = RobotsGate::new(Arc::clone(&harness.http));
    let page = url::Url::parse(&format!("{}/anzeige/5", server.uri())).unwrap();

    assert_eq!(gate.check(&page).await, RobotsDecision::Unavailable);
    assert_eq!(gate.check(&page).await, RobotsDecision::Allowed);
}
