//! Search backends against mocked Google CSE and DuckDuckGo endpoints

use crate::support::{
    html, mock_host, mock_portal, mount_listing, Harness, CANDIDATE_DETAIL, SECOND_CANDIDATE_DETAIL,
};
use lead_harvest::crawler::{
    CrawlControl, DuckDuckGoHtml, GoogleCse, QueryBank, QueryMode, SearchBackend, SearchChain, SearchError,
    SearchRequest,
};
use lead_harvest::http::FetchError;
use lead_harvest::resilience::{Outcome, RequestKind};
use lead_harvest::storage::Storage;
use serde_json::json;
use lead_harvest::HarvestError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{any, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(query: &str) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        date_restrict: None,
        num: 10,
    }
}

fn google(harness: &Harness, server: &MockServer, keys: &[&str]) -> Arc<GoogleCse> {
    let endpoint = Url::parse(&format!("{}/customsearch/v1", server.uri())).unwrap();
    Arc::new(
        GoogleCse::new(
            Arc::clone(&harness.http),
            keys.iter().map(|k| k.to_string()).collect(),
            "test-cx".to_string(),
        )
        .unwrap()
        .with_endpoint(endpoint),
    )
}

fn duckduckgo(harness: &Harness, server: &MockServer) -> Arc<DuckDuckGoHtml> {
    let endpoint = Url::parse(&format!("{}/html/", server.uri())).unwrap();
    Arc::new(DuckDuckGoHtml::new(Arc::clone(&harness.http)).unwrap().with_endpoint(endpoint))
}

fn ddg_results(links: &[String]) -> String {
    let results: String = links
        .iter()
        .map(|link| {
            format!(
                r#"<div class="result"><a class="result__a" href="/l/?uddg={}">Stellengesuch</a>
                <a class="result__snippet">Suche neue Stelle</a></div>"#,
                url::form_urlencoded::byte_serialize(link.as_bytes()).collect::<String>()
            )
        })
        .collect();
    format!("<html><body>{}</body></html>", results)
}

async fn mount_rate_limited_key(server: &MockServer, key: &str) {
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .and(query_param("key", key))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rate_limited_key_is_rotated_out() {
    let server = MockServer::start().await;
    mount_rate_limited_key(&server, "k1").await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .and(query_param("key", "k2"))
        .and(query_param("cx", "test-cx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "link": "https://portal.example/gesuche/1", "title": "Gesuch 1" },
                { "link": "https://portal.example/gesuche/2" }
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let backend = google(&harness, &server, &["k1", "k2"]);

    let hits = backend.search(&request("vertrieb stellengesuch")).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].url, "https://portal.example/gesuche/1");
    assert_eq!(hits[0].title.as_deref(), Some("Gesuch 1"));
    assert_eq!(backend.keys().active_count(), 1);

    // The retired key is not tried again
    let hits = backend.search(&request("callcenter stellengesuch")).await.unwrap();
    assert_eq!(hits.len(), 2);
}

fn penalize_key(harness: &Harness, server: &MockServer, index: usize) {
    harness.breaker.record(
        &format!("{}#key{}", mock_host(server), index),
        RequestKind::Api,
        &Outcome::Penalizing {
            reason: "HTTP 503".to_string(),
        },
        Instant::now(),
    );
}

#[tokio::test]
async fn test_deferred_key_is_skipped_for_next_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .and(query_param("key", "k1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .and(query_param("key", "k2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "link": "https://portal.example/gesuche/7" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    penalize_key(&harness, &server, 0);
    let backend = google(&harness, &server, &["k1", "k2"]);

    let hits = backend.search(&request("lager stellengesuch")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].url, "https://portal.example/gesuche/7");
    // Deferral is temporary, the key stays in rotation
    assert_eq!(backend.keys().active_count(), 2);
}

#[tokio::test]
async fn test_all_keys_deferred_fails_without_requests() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    penalize_key(&harness, &server, 0);
    penalize_key(&harness, &server, 1);
    let backend = google(&harness, &server, &["k1", "k2"]);

    let err = backend.search(&request("lager stellengesuch")).await.unwrap_err();
    assert!(matches!(
        err,
        SearchError::Fetch {
            source: FetchError::Deferred { .. },
            ..
        }
    ));
    assert_eq!(backend.keys().active_count(), 2);
}

#[tokio::test]
async fn test_exhausted_keys_fall_back_to_duckduckgo() {
    let server = MockServer::start().await;
    mount_rate_limited_key(&server, "k1").await;
    mount_rate_limited_key(&server, "k2").await;
    Mock::given(method("GET"))
        .and(path("/html/"))
        .and(query_param("q", "pflege stellengesuch"))
        .respond_with(html(&ddg_results(&["https://portal.example/gesuche/9".to_string()])))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let google = google(&harness, &server, &["k1", "k2"]);
    let chain = SearchChain::new(vec![
        Arc::clone(&google) as Arc<dyn SearchBackend>,
        duckduckgo(&harness, &server) as Arc<dyn SearchBackend>,
    ]);

    let outcome = chain.search(&request("pflege stellengesuch")).await.unwrap();
    assert_eq!(outcome.backend, "duckduckgo");
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].url, "https://portal.example/gesuche/9");
    assert_eq!(google.keys().active_count(), 0);
}

#[tokio::test]
async fn test_google_only_chain_reports_fatal_exhaustion() {
    let server = MockServer::start().await;
    mount_rate_limited_key(&server, "k1").await;

    let harness = Harness::new();
    let chain = SearchChain::new(vec![google(&harness, &server, &["k1"]) as Arc<dyn SearchBackend>]);

    let err = chain.search(&request("logistik stellengesuch")).await.unwrap_err();
    assert!(matches!(err, SearchError::KeysExhausted(1)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_failing_backends_are_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/html/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let chain = SearchChain::new(vec![duckduckgo(&harness, &server) as Arc<dyn SearchBackend>]);

    let err = chain.search(&request("handwerk stellengesuch")).await.unwrap_err();
    assert!(matches!(err, SearchError::AllBackendsFailed { .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_search_hits_become_leads_and_queries_are_not_repeated() {
    let server = MockServer::start().await;
    let profile = format!("{}/profil/9", server.uri());
    let queries = QueryBank::new(QueryMode::Candidates).generate_all(&["vertrieb".to_string()]);
    let (first_query, second_query) = (queries[0].text.clone(), queries[1].text.clone());

    Mock::given(method("GET"))
        .and(path("/html/"))
        .and(query_param("q", first_query.as_str()))
        .respond_with(html(&ddg_results(&[profile.clone()])))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/html/"))
        .respond_with(html(&ddg_results(&[profile.clone()])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profil/9"))
        .respond_with(html(CANDIDATE_DETAIL))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new().configure(|config| {
        config.crawler.industries = vec!["vertrieb".to_string()];
        config.crawler.queries_per_industry = 1;
    });
    let chain = SearchChain::new(vec![duckduckgo(&harness, &server) as Arc<dyn SearchBackend>]);
    let control = CrawlControl::new();

    let coordinator = Arc::new(harness.coordinator(Vec::new()).with_search(chain.clone()));
    let counters = coordinator.run(control.token()).await.unwrap();

    assert_eq!(counters.queries_issued, 1);
    assert_eq!(counters.leads_accepted, 1);
    {
        let storage = harness.storage.lock();
        assert!(storage.is_query_done(&first_query).unwrap());
        let lead = storage
            .find_lead_by_email("jonas.becker@example.com")
            .unwrap()
            .expect("Lead from search hit missing");
        assert_eq!(lead.source_query.as_deref(), Some(first_query.as_str()));
        assert_eq!(lead.industry.as_deref(), Some("vertrieb"));
        assert_eq!(lead.source_portal.as_deref(), Some("127.0.0.1"));
    }

    // The next run moves on to the second query; the profile is already seen
    let coordinator = Arc::new(harness.coordinator(Vec::new()).with_search(chain));
    let counters = coordinator.run(control.token()).await.unwrap();

    assert_eq!(counters.queries_issued, 1);
    assert_eq!(counters.leads_accepted, 0);
    assert!(harness.storage.lock().is_query_done(&second_query).unwrap());
}

#[tokio::test]
async fn test_key_exhaustion_still_flushes_in_flight_portal_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(429).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;
    mount_listing(&server, &[1, 2]).await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/1"))
        .respond_with(html(CANDIDATE_DETAIL).set_delay(Duration::from_millis(800)))
        .expect(1)
        .mount(&server)
        .await;
    // Never scheduled: the stop arrives while page 1 is still in flight
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/2"))
        .respond_with(html(SECOND_CANDIDATE_DETAIL))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new().configure(|c| c.crawler.queries_per_industry = 1);
    let chain = SearchChain::new(vec![google(&harness, &server, &["k1"]) as Arc<dyn SearchBackend>]);
    let coordinator = harness.coordinator(vec![mock_portal(&server, 0)]).with_search(chain);

    let control = CrawlControl::new();
    let result = Arc::new(coordinator).run(control.token()).await;
    assert!(matches!(result, Err(HarvestError::Search(SearchError::KeysExhausted(_)))));

    let storage = harness.storage.lock();
    assert_eq!(storage.count_leads().unwrap(), 1);
    assert!(storage
        .find_lead_by_email("jonas.becker@example.com")
        .unwrap()
        .is_some());
}
