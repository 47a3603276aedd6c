//! Run lifecycle through the controller: start, pause, stop, kill, crash

use crate::support::{html, mock_portal, mount_listing, Harness, CANDIDATE_DETAIL, SECOND_CANDIDATE_DETAIL};
use lead_harvest::crawler::{GoogleCse, SearchBackend, SearchChain};
use lead_harvest::lifecycle::{EventCategory, EventLevel, RunController, RunParams};
use lead_harvest::storage::Storage;
use lead_harvest::RunStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn controller(harness: &Harness) -> RunController {
    RunController::new(Arc::clone(&harness.storage), Arc::clone(&harness.breaker), harness.emitter())
}

fn params(harness: &Harness, server: &MockServer, delay_ms: u64) -> RunParams {
    RunParams {
        config_hash: "test-config".to_string(),
        coordinator: harness.coordinator(vec![mock_portal(server, delay_ms)]),
    }
}

/// Serves `count` distinct candidate detail pages under one listing
async fn mount_candidates(server: &MockServer, count: u32) {
    let ids: Vec<u32> = (1..=count).collect();
    mount_listing(server, &ids).await;
    for id in ids {
        let body = CANDIDATE_DETAIL
            .replace("jonas.becker", &format!("kandidat{}", id))
            .replace("23456789", &format!("2345{:04}", id));
        Mock::given(method("GET"))
            .and(path(format!("/s-stellengesuche/anzeige/{}", id)))
            .respond_with(html(&body))
            .mount(server)
            .await;
    }
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_controller_run_completes_and_records_counters() {
    let server = MockServer::start().await;
    mount_listing(&server, &[1, 2]).await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/1"))
        .respond_with(html(CANDIDATE_DETAIL))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s-stellengesuche/anzeige/2"))
        .respond_with(html(SECOND_CANDIDATE_DETAIL))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let controller = controller(&harness);
    let run_id = controller.start(params(&harness, &server, 0)).await.unwrap();

    assert_eq!(controller.wait().await, RunStatus::Completed);

    let report = controller.status();
    assert_eq!(report.run_id, Some(run_id));
    assert_eq!(report.counters.leads_accepted, 2);
    assert!(report.failure.is_none());

    let record = harness.storage.lock().get_run(run_id).unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.leads_accepted, 2);
    assert_eq!(record.config_hash, "test-config");
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn test_paused_run_makes_no_progress_until_resumed() {
    let server = MockServer::start().await;
    mount_candidates(&server, 4).await;

    let harness = Harness::new();
    let controller = controller(&harness);
    controller.start(params(&harness, &server, 100)).await.unwrap();
    controller.pause().unwrap();
    assert_eq!(controller.status().status, RunStatus::Paused);

    // Let anything already in flight settle, then watch for progress
    tokio::time::sleep(Duration::from_millis(400)).await;
    let paused = controller.status().counters;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(controller.status().counters, paused);
    assert!(paused.leads_accepted < 4);

    controller.resume().unwrap();
    assert_eq!(controller.wait().await, RunStatus::Completed);
    assert_eq!(controller.status().counters.leads_accepted, 4);
    assert_eq!(harness.storage.lock().count_leads().unwrap(), 4);
}

#[tokio::test]
async fn test_stop_finishes_cooperatively() {
    let server = MockServer::start().await;
    mount_candidates(&server, 6).await;

    let harness = Harness::new();
    let controller = controller(&harness);
    let run_id = controller.start(params(&harness, &server, 200)).await.unwrap();

    wait_for("first stored lead", || controller.status().counters.leads_accepted >= 1).await;
    controller.stop().await.unwrap();

    assert_eq!(controller.wait().await, RunStatus::Completed);
    let stored = harness.storage.lock().count_leads().unwrap();
    assert!((1..6).contains(&stored), "stored {} leads", stored);

    let record = harness.storage.lock().get_run(run_id).unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.leads_accepted, stored);

    let messages = harness.sink.messages();
    assert!(messages.contains(&"Run stopping".to_string()));
    assert!(messages.contains(&"Run completed".to_string()));
}

#[tokio::test]
async fn test_kill_aborts_run() {
    let server = MockServer::start().await;
    mount_listing(&server, &[1]).await;
    Mock::given(method("GET"))
        .and(path_regex("^/s-stellengesuche/anzeige/"))
        .respond_with(html(CANDIDATE_DETAIL).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let controller = controller(&harness);
    let run_id = controller.start(params(&harness, &server, 0)).await.unwrap();

    wait_for("listing page", || controller.status().counters.pages_fetched >= 1).await;
    controller.kill().await.unwrap();

    assert_eq!(controller.wait().await, RunStatus::Killed);
    assert_eq!(harness.storage.lock().count_leads().unwrap(), 0);
    let record = harness.storage.lock().get_run(run_id).unwrap();
    assert_eq!(record.status, RunStatus::Killed);
    let messages = harness.sink.messages();
    let stopping = messages.iter().position(|m| m == "Run stopping").expect("No stopping event");
    let killed = messages.iter().position(|m| m == "Run killed").expect("No killed event");
    assert!(stopping < killed);

    // Nothing is left to stop
    assert!(controller.stop().await.is_err());
}

#[tokio::test]
async fn test_exhausted_search_keys_crash_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let endpoint = Url::parse(&format!("{}/customsearch/v1", server.uri())).unwrap();
    let google = GoogleCse::new(
        Arc::clone(&harness.http),
        vec!["k1".to_string(), "k2".to_string()],
        "test-cx".to_string(),
    )
    .unwrap()
    .with_endpoint(endpoint);
    let chain = SearchChain::new(vec![Arc::new(google) as Arc<dyn SearchBackend>]);

    let controller = controller(&harness);
    let run_id = controller
        .start(RunParams {
            config_hash: "test-config".to_string(),
            coordinator: harness.coordinator(Vec::new()).with_search(chain),
        })
        .await
        .unwrap();

    assert_eq!(controller.wait().await, RunStatus::Crashed);

    let failure = controller.status().failure.expect("Crash without failure record");
    assert_eq!(failure.classification, "search_keys_exhausted");

    let record = harness.storage.lock().get_run(run_id).unwrap();
    assert_eq!(record.status, RunStatus::Crashed);
    assert_eq!(record.error_class.as_deref(), Some("search_keys_exhausted"));

    let crash = harness
        .sink
        .events()
        .into_iter()
        .find(|e| e.message == "Run crashed")
        .expect("No crash event");
    assert_eq!(crash.level, EventLevel::Critical);
    assert_eq!(crash.context["classification"], "search_keys_exhausted");
    assert_eq!(crash.context["from"], "stopping");
}

#[tokio::test]
async fn test_lifecycle_events_serialize_to_stable_json() {
    let server = MockServer::start().await;
    mount_listing(&server, &[]).await;

    let harness = Harness::new();
    let controller = controller(&harness);
    let run_id = controller.start(params(&harness, &server, 0)).await.unwrap();
    controller.wait().await;

    let running = harness
        .sink
        .events()
        .into_iter()
        .find(|e| e.category == EventCategory::Lifecycle && e.message == "Run running")
        .expect("No running event");
    let json: serde_json::Value = serde_json::from_str(&running.to_json().unwrap()).unwrap();

    assert_eq!(json["level"], "info");
    assert_eq!(json["category"], "lifecycle");
    assert_eq!(json["message"], "Run running");
    assert_eq!(json["run_id"], run_id);
    assert_eq!(json["context"]["from"], "starting");
    assert_eq!(json["context"]["to"], "running");
    assert!(json["timestamp"].as_str().is_some_and(|ts| ts.contains('T')));
}
