//! Integration tests for the HTTP subscription registry.
//!
//! These tests run `HttpRegistry` against a local mock server and check the
//! wire contract: methods, paths, bodies and status handling.

use pushsync::notifications::registry::Operation;
use pushsync::{HttpRegistry, PushSubscription, RegistryError, SubscriptionId, SubscriptionRegistry};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const P256DH: &str =
    "BHQRAlHjvxDl2_-J0ilJpW9APU0E-wRytwXjRepFIru8A6xylKwdFlPOortnEfqTeG8FHqcZ2emJBihH7nnrj3A";
const AUTH: &str = "AAECAwQFBgcICQoLDA0ODw";
const ENDPOINT: &str = "https://push.example/abc";
const ID: &str = "96Jj-Hhun5VAxIp1ckXjEpBwiXlUjDafIHy8_54ju4Y";

fn record_path(topic: &str) -> String {
    format!("/api/v1/subscriptions/{topic}/{ID}")
}

fn registry(server: &MockServer) -> HttpRegistry {
    HttpRegistry::new(&format!("{}/api/v1", server.uri()), Duration::from_secs(5))
        .expect("registry")
}

fn subscription() -> PushSubscription {
    PushSubscription::new(ENDPOINT, P256DH, AUTH)
}

#[tokio::test]
async fn test_create_posts_subscription_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(record_path("alerts")))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({
            "endpoint": ENDPOINT,
            "keys": { "p256dh": P256DH, "auth": AUTH }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let id = SubscriptionId::derive(ENDPOINT);
    registry(&server)
        .create("alerts", &id, &subscription())
        .await
        .expect("create should succeed on 201");
}

#[tokio::test]
async fn test_create_other_status_is_tagged_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(record_path("alerts")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let id = SubscriptionId::derive(ENDPOINT);
    let err = registry(&server)
        .create("alerts", &id, &subscription())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::UnexpectedStatus {
            operation: Operation::Create,
            status: 500
        }
    ));

    // 200 is not the acknowledgement create expects either
    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let err = registry(&server)
        .create("alerts", &id, &subscription())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(200));
}

#[tokio::test]
async fn test_delete_statuses() {
    let server = MockServer::start().await;
    let id = SubscriptionId::derive(ENDPOINT);

    Mock::given(method("DELETE"))
        .and(path(record_path("alerts")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    registry(&server)
        .delete("alerts", &id)
        .await
        .expect("204 is success");

    server.reset().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let err = registry(&server).delete("alerts", &id).await.unwrap_err();
    assert!(err.is_not_found());

    server.reset().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let err = registry(&server).delete("alerts", &id).await.unwrap_err();
    assert!(!err.is_not_found());
    assert_eq!(err.status(), Some(403));
}

#[tokio::test]
async fn test_exists_statuses() {
    let server = MockServer::start().await;
    let id = SubscriptionId::derive(ENDPOINT);

    Mock::given(method("HEAD"))
        .and(path(record_path("alerts")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    assert!(registry(&server).exists("alerts", &id).await.expect("probe"));

    // The reference server answers a found record with 204
    server.reset().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    assert!(registry(&server).exists("alerts", &id).await.expect("probe"));

    server.reset().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    assert!(!registry(&server).exists("alerts", &id).await.expect("probe"));

    server.reset().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let err = registry(&server).exists("alerts", &id).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::UnexpectedStatus {
            operation: Operation::Exists,
            status: 503
        }
    ));
}

#[tokio::test]
async fn test_topic_segment_is_percent_encoded_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(record_path("team%2Fops")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let id = SubscriptionId::derive(ENDPOINT);
    assert!(registry(&server)
        .exists("team/ops", &id)
        .await
        .expect("probe"));
}

#[tokio::test]
async fn test_dot_topics_never_reach_the_server() {
    let server = MockServer::start().await;
    let registry = registry(&server);
    let id = SubscriptionId::derive(ENDPOINT);

    for topic in ["", ".", ".."] {
        assert!(matches!(
            registry.exists(topic, &id).await,
            Err(RegistryError::InvalidTopic(_))
        ));
        assert!(matches!(
            registry.create(topic, &id, &subscription()).await,
            Err(RegistryError::InvalidTopic(_))
        ));
        assert!(matches!(
            registry.delete(topic, &id).await,
            Err(RegistryError::InvalidTopic(_))
        ));
    }

    let requests = server.received_requests().await.expect("recording enabled");
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    // Nothing listens on a server that has been shut down
    let server = MockServer::start().await;
    let registry = registry(&server);
    drop(server);

    let id = SubscriptionId::derive(ENDPOINT);
    let err = registry.exists("alerts", &id).await.unwrap_err();
    assert!(matches!(err, RegistryError::Transport(_)));
    assert_eq!(err.status(), None);
}
