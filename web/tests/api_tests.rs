//! HTTP API tests against the in-memory queue and store.
//!
//! Requests go through the full router (correlation layer included). Tests
//! that need outcomes drain the queue with a processor worker and poll the
//! status endpoint the way a client would.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use rollcall_core::types::EventId;
use rollcall_runtime::retry::RetryPolicy;
use rollcall_runtime::{ProcessorWorker, RegistrationProcessor};
use rollcall_testing::{InMemoryCommandQueue, InMemoryRegistrationStore, test_clock};
use rollcall_web::{AppState, CORRELATION_ID_HEADER, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Api {
    server: TestServer,
    store: InMemoryRegistrationStore,
    queue: InMemoryCommandQueue,
}

impl Api {
    fn new() -> Self {
        let store = InMemoryRegistrationStore::new();
        let queue = InMemoryCommandQueue::new();
        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(test_clock()),
        );
        let server = TestServer::new(build_router(state)).expect("Failed to start test server");

        Self {
            server,
            store,
            queue,
        }
    }

    async fn create_event(&self, total_spots: i64) -> String {
        let response = self
            .server
            .post("/api/v1/events")
            .json(&json!({
                "name": "Rust meetup",
                "description": "Monthly meetup",
                "location": "Berlin",
                "date": "2025-06-01",
                "organizer_id": "org-1",
                "total_spots": total_spots,
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()["id"].as_str().unwrap().to_string()
    }

    async fn register(&self, event_id: &str, user: &str) -> axum_test::TestResponse {
        self.server
            .post(&format!("/api/v1/events/{event_id}/register"))
            .json(&json!({ "user_id": user }))
            .await
    }

    async fn register_with_key(&self, event_id: &str, user: &str, key: &'static str) -> Value {
        let response = self
            .server
            .post(&format!("/api/v1/events/{event_id}/register"))
            .add_header(
                HeaderName::from_static("idempotency-key"),
                HeaderValue::from_static(key),
            )
            .json(&json!({ "user_id": user }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        response.json::<Value>()
    }

    async fn unregister(&self, event_id: &str, user: &str) -> axum_test::TestResponse {
        self.server
            .delete(&format!("/api/v1/events/{event_id}/unregister"))
            .json(&json!({ "user_id": user }))
            .await
    }

    async fn status(&self, event_id: &str, user: &str) -> Value {
        let response = self
            .server
            .get(&format!("/api/v1/events/{event_id}/registrations/{user}"))
            .await;
        response.assert_status_ok();
        response.json::<Value>()
    }

    /// Apply everything queued so far with one worker, then stop it.
    async fn drain(&self) {
        let (shutdown, _) = broadcast::channel(1);
        let processor = Arc::new(RegistrationProcessor::new(
            Arc::new(self.store.clone()),
            Arc::new(test_clock()),
        ));
        let worker = ProcessorWorker::new(
            "api-test-processor",
            processor,
            Arc::new(self.queue.clone()),
            shutdown.subscribe(),
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(20))
                .build(),
        )
        .spawn();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.queue.is_idle() || self.store.outstanding_total() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Queue did not drain");

        let _ = shutdown.send(());
        worker.await.unwrap();
    }
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_ready() {
    let api = Api::new();

    let health = api.server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>()["status"], "ok");

    api.server.get("/ready").await.assert_status_ok();

    api.store.fail_next_reads(1);
    api.server
        .get("/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let api = Api::new();
    let id = "6b1f5c9e-2f0a-4c1e-9a57-0d5f3c3f8a10";

    let response = api
        .server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_static(id),
        )
        .await;

    assert_eq!(response.header(CORRELATION_ID_HEADER), id);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_create_list_and_get_event() {
    let api = Api::new();
    let event_id = api.create_event(3).await;

    let list = api.server.get("/api/v1/events").await.json::<Value>();
    assert_eq!(list["total"], 1);
    assert_eq!(list["events"][0]["id"], event_id.as_str());

    let event = api
        .server
        .get(&format!("/api/v1/events/{event_id}"))
        .await
        .json::<Value>();
    assert_eq!(event["total_spots"], 3);
    assert_eq!(event["registered_count"], 0);
}

#[tokio::test]
async fn test_create_event_defaults_and_validation() {
    let api = Api::new();

    let response = api
        .server
        .post("/api/v1/events")
        .json(&json!({ "name": "Defaults" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["total_spots"], 100);

    api.server
        .post("/api/v1/events")
        .json(&json!({ "name": "Empty", "total_spots": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_and_malformed_event_ids() {
    let api = Api::new();

    api.server
        .get(&format!("/api/v1/events/{}", EventId::new()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    api.server
        .get("/api/v1/events/not-a-uuid")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_is_accepted_and_pending() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    let response = api.register(&event_id, "alice").await;
    response.assert_status(StatusCode::ACCEPTED);
    let body = response.json::<Value>();
    assert_eq!(body["message"], "Registration request submitted");
    assert!(body["idempotency_key"].as_str().is_some_and(|k| !k.is_empty()));

    assert_eq!(api.status(&event_id, "alice").await["status"], "Pending");
    assert_eq!(api.queue.pending(), 1);
}

#[tokio::test]
async fn test_register_then_processed_is_registered() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    api.register(&event_id, "alice")
        .await
        .assert_status(StatusCode::ACCEPTED);
    api.drain().await;

    let status = api.status(&event_id, "alice").await;
    assert_eq!(status["status"], "Registered");
    assert_eq!(status["rejection"], Value::Null);

    let event = api
        .server
        .get(&format!("/api/v1/events/{event_id}"))
        .await
        .json::<Value>();
    assert_eq!(event["registered_count"], 1);
}

#[tokio::test]
async fn test_full_event_reports_rejection() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    for user in ["alice", "bob", "carol"] {
        api.register(&event_id, user)
            .await
            .assert_status(StatusCode::ACCEPTED);
    }
    api.drain().await;

    assert_eq!(api.status(&event_id, "alice").await["status"], "Registered");
    assert_eq!(api.status(&event_id, "bob").await["status"], "Registered");
    let carol = api.status(&event_id, "carol").await;
    assert_eq!(carol["status"], "Unregistered");
    assert_eq!(carol["rejection"], "event_full");
}

#[tokio::test]
async fn test_idempotency_key_header_is_used() {
    let api = Api::new();
    let event_id = api.create_event(5).await;

    let first = api.register_with_key(&event_id, "alice", "retry-1").await;
    let second = api.register_with_key(&event_id, "alice", "retry-1").await;
    assert_eq!(first["idempotency_key"], second["idempotency_key"]);

    api.drain().await;
    assert_eq!(api.store.registered_count(event_id.parse().unwrap()), Some(1));
}

#[tokio::test]
async fn test_register_rejects_bad_input() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    api.register(&event_id, "   ")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    api.register("not-a-uuid", "alice")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    api.server
        .post(&format!("/api/v1/events/{event_id}/register"))
        .json(&json!({ "name": "alice" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    api.register(&EventId::new().to_string(), "alice")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queue_outage_is_service_unavailable() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    api.queue.fail_next_enqueues(1);
    let response = api.register(&event_id, "alice").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(api.status(&event_id, "alice").await["status"], "Unregistered");
}

// ============================================================================
// Unregistration
// ============================================================================

#[tokio::test]
async fn test_unregister_without_registration_is_not_found() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    let response = api.unregister(&event_id, "alice").await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["message"], "Registration not found");
}

#[tokio::test]
async fn test_unregister_frees_the_spot() {
    let api = Api::new();
    let event_id = api.create_event(1).await;

    api.register(&event_id, "alice")
        .await
        .assert_status(StatusCode::ACCEPTED);
    api.drain().await;

    let response = api.unregister(&event_id, "alice").await;
    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(
        response.json::<Value>()["message"],
        "Unregistration request submitted"
    );
    api.drain().await;

    assert_eq!(api.status(&event_id, "alice").await["status"], "Unregistered");

    api.register(&event_id, "bob")
        .await
        .assert_status(StatusCode::ACCEPTED);
    api.drain().await;
    assert_eq!(api.status(&event_id, "bob").await["status"], "Registered");
}

#[tokio::test]
async fn test_status_for_unknown_event_is_not_found() {
    let api = Api::new();

    api.server
        .get(&format!("/api/v1/events/{}/registrations/alice", EventId::new()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_untouched_pair_is_unregistered() {
    let api = Api::new();
    let event_id = api.create_event(2).await;

    let status = api.status(&event_id, "nobody").await;

    assert_eq!(status["status"], "Unregistered");
    assert_eq!(status["last_updated"], Value::Null);
}
