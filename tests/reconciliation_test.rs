//! Reconciliation loop behavior: stale gateway-timeout sweeping with the
//! newest-wins rule, and verification of submitted reports against the
//! mocked status-check endpoint.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use transient_dispatch::clients::{ReportClient, ReportClientConfig};
use transient_dispatch::config::DispatchConfig;
use transient_dispatch::dispatch::ReconciliationLoop;
use transient_dispatch::models::{NewSubmissionRequest, SharingService};
use transient_dispatch::notify::{Notification, NotificationSink};
use transient_dispatch::retry::RetryPolicy;
use transient_dispatch::store::SubmissionStore;
use transient_dispatch::test_helpers::{MemoryStore, RecordingSink};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(id: i64) -> SharingService {
    let now = Utc::now().naive_utc();
    SharingService {
        id,
        name: "transients".to_string(),
        testing: false,
        acknowledgments: None,
        source_group_id: None,
        bot_id: None,
        bot_name: None,
        coauthors: None,
        photometry_options: None,
        created_at: now,
        modified_at: now,
    }
}

fn new_request(obj_id: &str) -> NewSubmissionRequest {
    NewSubmissionRequest {
        obj_id: obj_id.to_string(),
        sharing_service_id: 1,
        user_id: 3,
        publish_to_report_system: true,
        publish_to_relay_system: false,
        archival: false,
        archival_comment: None,
        photometry_options: None,
    }
}

fn report_client(base_url: &str) -> ReportClient {
    ReportClient::new(ReportClientConfig {
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        bot_id: None,
        bot_name: None,
        source_group_id: None,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(1, Duration::from_millis(1)),
    })
    .unwrap()
}

struct Fixture {
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    reconciler: ReconciliationLoop<MemoryStore>,
}

async fn fixture(server: &MockServer) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.add_service(service(1)).await;
    let sink = Arc::new(RecordingSink::new());
    let reconciler = ReconciliationLoop::new(
        store.clone(),
        report_client(&server.uri()),
        sink.clone() as Arc<dyn NotificationSink>,
        DispatchConfig::default(),
    );
    Fixture {
        store,
        sink,
        reconciler,
    }
}

#[tokio::test]
async fn test_stale_gateway_timeout_resets_for_resubmission() {
    let server = MockServer::start().await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f
        .store
        .insert_with_created_at(new_request("AT2026abc"), now - ChronoDuration::hours(2))
        .await
        .unwrap();
    f.store
        .set_request_state(
            request.id,
            "Error: Gateway Time-out",
            Some("REP-1"),
            now - ChronoDuration::minutes(10),
        )
        .await
        .unwrap();

    assert_eq!(f.reconciler.sweep_stale(now).await.unwrap(), 1);

    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "pending");
    // re-submission must allocate a fresh external id
    assert!(row.external_submission_id.is_none());
    assert!(f
        .sink
        .received()
        .await
        .contains(&Notification::ServiceRefresh { sharing_service_id: 1 }));
}

#[tokio::test]
async fn test_recently_modified_gateway_timeout_is_left_alone() {
    let server = MockServer::start().await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f
        .store
        .insert_with_created_at(new_request("AT2026abc"), now - ChronoDuration::hours(1))
        .await
        .unwrap();
    f.store
        .set_request_state(
            request.id,
            "Error: Gateway Time-out",
            None,
            now - ChronoDuration::minutes(2),
        )
        .await
        .unwrap();

    assert_eq!(f.reconciler.sweep_stale(now).await.unwrap(), 0);
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "Error: Gateway Time-out");
}

#[tokio::test]
async fn test_outranked_stale_item_loses_to_newer_success() {
    let server = MockServer::start().await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let stale = f
        .store
        .insert_with_created_at(new_request("AT2026abc"), now - ChronoDuration::hours(2))
        .await
        .unwrap();
    f.store
        .set_request_state(
            stale.id,
            "submitted Gateway Time-out",
            None,
            now - ChronoDuration::minutes(10),
        )
        .await
        .unwrap();

    // a newer request for the same object and service already succeeded
    let newer = f
        .store
        .insert_with_created_at(new_request("AT2026abc"), now - ChronoDuration::hours(1))
        .await
        .unwrap();
    f.store
        .set_request_state(newer.id, "complete", Some("REP-2"), now)
        .await
        .unwrap();

    assert_eq!(f.reconciler.sweep_stale(now).await.unwrap(), 1);

    let row = f.store.get(stale.id).await.unwrap().unwrap();
    assert!(row.report_status.starts_with("Error:"));
    assert!(row.report_status.contains("superseded"));
    // the newer winner is untouched
    let winner = f.store.get(newer.id).await.unwrap().unwrap();
    assert_eq!(winner.report_status, "complete");
}

#[tokio::test]
async fn test_verification_confirms_and_notifies_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": {"name": "2026abc", "code": 100, "message": ""}
        })))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(request.id, "submitted", Some("REP-1"), now)
        .await
        .unwrap();

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "complete");

    let confirmed: Vec<_> = f
        .sink
        .received()
        .await
        .into_iter()
        .filter(|n| matches!(n, Notification::ConfirmedName { .. }))
        .collect();
    assert_eq!(
        confirmed,
        vec![Notification::ConfirmedName {
            obj_id: "AT2026abc".to_string(),
            name: "2026abc".to_string()
        }]
    );

    // the item is terminal now; a second cycle finds nothing and emits
    // no duplicate notifications
    assert!(!f.reconciler.verify_one(now).await.unwrap());
    assert_eq!(f.sink.received().await.len(), 2); // refresh + confirmed name
}

#[tokio::test]
async fn test_verification_preserves_acknowledgment_note() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": {"name": "2026abc", "code": 101, "message": "WARNING: near duplicate"}
        })))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(
            request.id,
            "submitted WARNING: coordinates near 2026aaa",
            Some("REP-1"),
            now,
        )
        .await
        .unwrap();

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "complete WARNING: coordinates near 2026aaa");
}

#[tokio::test]
async fn test_identical_report_completes_without_confirmed_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"message": "An identical report already exists"}"#),
        )
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(request.id, "submitted", Some("REP-1"), now)
        .await
        .unwrap();

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "complete");
    assert!(!f
        .sink
        .received()
        .await
        .iter()
        .any(|n| matches!(n, Notification::ConfirmedName { .. })));
}

#[tokio::test]
async fn test_not_found_within_grace_is_left_submitted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(request.id, "submitted", Some("REP-1"), now)
        .await
        .unwrap();

    assert!(!f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "submitted");
    assert_eq!(row.external_submission_id.as_deref(), Some("REP-1"));
}

#[tokio::test]
async fn test_not_found_past_grace_resets_to_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(
            request.id,
            "submitted",
            Some("REP-1"),
            now - ChronoDuration::minutes(10),
        )
        .await
        .unwrap();

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "pending");
    assert!(row.external_submission_id.is_none());
}

#[tokio::test]
async fn test_not_found_with_matching_markers_confirms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(request.id, "submitted", Some("REP-1"), now)
        .await
        .unwrap();
    f.store.set_object_markers("AT2026abc", 1).await;

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert_eq!(row.report_status, "confirmed");
}

#[tokio::test]
async fn test_unexpected_status_reply_is_recorded_for_audit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(504).set_body_string("Gateway Time-out"))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(request.id, "submitted", Some("REP-1"), now)
        .await
        .unwrap();

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert!(row.report_status.starts_with("Error:"));
    assert!(row.report_status.contains("Gateway Time-out"));
    // the raw reply lands in the audit column, not just the status string
    let response = row.response.unwrap();
    assert_eq!(response["status"], 504);
    assert_eq!(response["body"], "Gateway Time-out");
}

#[tokio::test]
async fn test_field_errors_terminal_and_recorded() {
    let server = MockServer::start().await;
    let field_errors = json!({"at_report": {"reporter": ["value too long"]}});
    Mock::given(method("POST"))
        .and(path("/report-status"))
        .respond_with(ResponseTemplate::new(400).set_body_json(field_errors.clone()))
        .mount(&server)
        .await;
    let f = fixture(&server).await;
    let now = Utc::now().naive_utc();

    let request = f.store.insert(new_request("AT2026abc")).await.unwrap();
    f.store
        .set_request_state(request.id, "submitted", Some("REP-1"), now)
        .await
        .unwrap();

    assert!(f.reconciler.verify_one(now).await.unwrap());
    let row = f.store.get(request.id).await.unwrap().unwrap();
    assert!(row.report_status.starts_with("Error:"));
    assert_eq!(row.response, Some(field_errors));
}
