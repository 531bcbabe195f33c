//! Retrieval loop behavior against mocked facility endpoints: busy
//! sentinels keep polling, terminal facility errors conclude the
//! transaction, completed polls persist deduplicated photometry, and
//! transport failures only defer the next attempt.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use transient_dispatch::clients::{AdapterRegistry, FacilityHttpClient};
use transient_dispatch::config::DispatchConfig;
use transient_dispatch::dispatch::RetrievalLoop;
use transient_dispatch::models::NewFacilityTransactionRequest;
use transient_dispatch::notify::{Notification, NotificationSink};
use transient_dispatch::store::FacilityStore;
use transient_dispatch::test_helpers::{MemoryStore, RecordingSink};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn txn(facility: &str, endpoint: &str, followup_id: i64) -> NewFacilityTransactionRequest {
    NewFacilityTransactionRequest {
        followup_request_id: followup_id,
        obj_id: "AT2026abc".to_string(),
        facility_name: facility.to_string(),
        method: "GET".to_string(),
        endpoint: endpoint.to_string(),
        headers: None,
        params: None,
        body: None,
    }
}

fn test_config() -> DispatchConfig {
    DispatchConfig {
        retrieval_pacing: Duration::from_millis(1),
        ..DispatchConfig::default()
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    retriever: RetrievalLoop<MemoryStore>,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::new());
    let retriever = RetrievalLoop::new(
        store.clone(),
        FacilityHttpClient::new(Duration::from_secs(5)).unwrap(),
        Arc::new(AdapterRegistry::with_defaults().await),
        sink.clone() as Arc<dyn NotificationSink>,
        test_config(),
    );
    Fixture {
        store,
        sink,
        retriever,
    }
}

#[tokio::test]
async fn test_busy_facility_keeps_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("database is busy; try again"))
        .mount(&server)
        .await;
    let f = fixture().await;
    let endpoint = format!("{}/queue/1", server.uri());
    let inserted = f.store.insert_transaction(txn("atlas", &endpoint, 10)).await.unwrap();

    let now = Utc::now().naive_utc();
    assert_eq!(f.retriever.process_batch(now).await.unwrap(), 1);

    let row = f.store.transaction(inserted.id).await.unwrap();
    assert_eq!(row.status, "database is busy; try again");
    assert!(row.last_query.is_some());
    assert_eq!(
        f.store.followup_status(10).await.as_deref(),
        Some("database is busy; try again")
    );
    // the transaction stays live for a later pass
    assert!(!row.status().is_terminal());
}

#[tokio::test]
async fn test_zero_records_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/extract/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Zero records returned"))
        .mount(&server)
        .await;
    let f = fixture().await;
    let endpoint = format!("{}/extract/1", server.uri());
    let inserted = f
        .store
        .insert_transaction(txn("panstarrs", &endpoint, 11))
        .await
        .unwrap();

    let now = Utc::now().naive_utc();
    f.retriever.process_batch(now).await.unwrap();

    let row = f.store.transaction(inserted.id).await.unwrap();
    assert_eq!(row.status, "error: Zero records returned");
    assert!(row.status().is_terminal());
    assert_eq!(
        f.store.followup_status(11).await.as_deref(),
        Some("error: Zero records returned")
    );
    assert!(f
        .sink
        .received()
        .await
        .contains(&Notification::FollowupRefresh { followup_request_id: 11 }));

    // terminal transactions are never polled again
    assert_eq!(f.retriever.process_batch(now).await.unwrap(), 0);
}

#[tokio::test]
async fn test_completed_poll_persists_photometry() {
    let server = MockServer::start().await;
    let body = "MJD filter mag magerr limiting_mag\n60001.0 c 18.2 0.05 20.1\n60002.0 o 18.0 0.04 20.3";
    Mock::given(method("GET"))
        .and(path("/queue/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    let f = fixture().await;
    let endpoint = format!("{}/queue/2", server.uri());
    let inserted = f.store.insert_transaction(txn("atlas", &endpoint, 12)).await.unwrap();

    let now = Utc::now().naive_utc();
    f.retriever.process_batch(now).await.unwrap();

    let row = f.store.transaction(inserted.id).await.unwrap();
    assert_eq!(row.status, "complete");
    assert_eq!(f.store.followup_status(12).await.as_deref(), Some("complete"));

    let persisted = f.store.persisted_photometry("AT2026abc").await;
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].origin.as_deref(), Some("atlas"));
}

#[tokio::test]
async fn test_duplicate_photometry_is_suppressed() {
    let server = MockServer::start().await;
    // both transactions return the 60001.0 point; the second also brings
    // a new one
    Mock::given(method("GET"))
        .and(path("/queue/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "MJD filter mag magerr limiting_mag\n60001.0 c 18.2 0.05 20.1",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "MJD filter mag magerr limiting_mag\n60001.0 c 18.2 0.05 20.1\n60003.0 c 17.9 0.04 20.2",
        ))
        .mount(&server)
        .await;
    let f = fixture().await;
    f.store
        .insert_transaction(txn("atlas", &format!("{}/queue/3", server.uri()), 13))
        .await
        .unwrap();
    f.store
        .insert_transaction(txn("atlas", &format!("{}/queue/4", server.uri()), 14))
        .await
        .unwrap();

    let now = Utc::now().naive_utc();
    assert_eq!(f.retriever.process_batch(now).await.unwrap(), 2);

    let persisted = f.store.persisted_photometry("AT2026abc").await;
    assert_eq!(persisted.len(), 2);
}

#[tokio::test]
async fn test_unknown_facility_is_terminal() {
    let f = fixture().await;
    let inserted = f
        .store
        .insert_transaction(txn("unknown-scope", "http://facility.invalid/q", 15))
        .await
        .unwrap();

    let now = Utc::now().naive_utc();
    f.retriever.process_batch(now).await.unwrap();

    let row = f.store.transaction(inserted.id).await.unwrap();
    assert!(row.status.starts_with("error:"));
    assert!(row.status.contains("no adapter registered"));
}

#[tokio::test]
async fn test_transport_failure_only_defers_next_poll() {
    let f = fixture().await;
    // closed port: connection refused
    let inserted = f
        .store
        .insert_transaction(txn("atlas", "http://127.0.0.1:1/queue/9", 16))
        .await
        .unwrap();

    let now = Utc::now().naive_utc();
    f.retriever.process_batch(now).await.unwrap();

    let row = f.store.transaction(inserted.id).await.unwrap();
    assert_eq!(row.status, "pending");
    assert!(row.last_query.is_some());
    assert!(f.sink.received().await.is_empty());
}
