//! Provision executor tests against a mock control plane.

use frostguard_lifecycle::{ProvisionExecutor, ProvisionRequest, ProvisionStep};
use frostguard_ttn::client::{TtnClient, TtnClientConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> TtnClient {
    TtnClient::new(
        TtnClientConfig::new(server.uri(), "NNSXS.ADMINKEY.ABCD").with_allow_insecure(),
    )
    .unwrap()
}

const TTN_ORG: &str = "fg-root";
const APP: &str = "fg-app-acme";

fn request() -> ProvisionRequest {
    ProvisionRequest {
        org_name: "Acme Cold Storage".to_string(),
        org_slug: "acme".to_string(),
        resume_from: None,
    }
}

async fn mount_create_application(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/organizations/{TTN_ORG}/applications")))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "ids": {"application_id": APP}
        })))
        .mount(server)
        .await;
}

async fn mount_create_api_key(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/applications/{APP}/api-keys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "key-id-1",
            "key": "NNSXS.FRESHKEY.WXYZ"
        })))
        .mount(server)
        .await;
}

async fn mount_create_webhook(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/as/webhooks/{APP}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": {"webhook_id": "fg-uplinks"}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn happy_path_produces_all_artifacts() {
    let server = MockServer::start().await;
    mount_create_application(&server, 200).await;
    mount_create_api_key(&server).await;
    mount_create_webhook(&server).await;

    let client = client_for(&server);
    let run = ProvisionExecutor::new(&client, TTN_ORG, "https://ingest.frostguard.io")
        .execute(&request())
        .await
        .unwrap();

    assert!(run.failure.is_none());
    assert!(run.ready_to_save());
    assert_eq!(run.artifacts.application_id, APP);
    assert_eq!(run.artifacts.api_key.unwrap().key, "NNSXS.FRESHKEY.WXYZ");
    assert_eq!(run.artifacts.webhook_id.as_deref(), Some("fg-uplinks"));
    assert_eq!(run.artifacts.webhook_secret.unwrap().len(), 64);
    assert_eq!(
        run.completed,
        vec![
            ProvisionStep::CreateApplication,
            ProvisionStep::CreateApiKey,
            ProvisionStep::CreateWebhook,
        ]
    );
}

#[tokio::test]
async fn existing_application_conflict_is_not_a_failure() {
    let server = MockServer::start().await;
    mount_create_application(&server, 409).await;
    mount_create_api_key(&server).await;
    mount_create_webhook(&server).await;

    let client = client_for(&server);
    let run = ProvisionExecutor::new(&client, TTN_ORG, "https://ingest.frostguard.io")
        .execute(&request())
        .await
        .unwrap();

    assert!(run.failure.is_none());
    assert!(run.completed.contains(&ProvisionStep::CreateApplication));
}

#[tokio::test]
async fn rights_error_is_not_retryable() {
    let server = MockServer::start().await;
    mount_create_application(&server, 200).await;
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/applications/{APP}/api-keys")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "no rights"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let run = ProvisionExecutor::new(&client, TTN_ORG, "https://ingest.frostguard.io")
        .execute(&request())
        .await
        .unwrap();

    let failure = run.failure.unwrap();
    assert_eq!(failure.step, ProvisionStep::CreateApiKey);
    assert_eq!(failure.code, "RIGHTS_ERROR");
    assert!(!failure.retry);
}

#[tokio::test]
async fn rate_limit_is_retryable() {
    let server = MockServer::start().await;
    mount_create_application(&server, 200).await;
    mount_create_api_key(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/as/webhooks/{APP}")))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"message": "rate limit exceeded"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let run = ProvisionExecutor::new(&client, TTN_ORG, "https://ingest.frostguard.io")
        .execute(&request())
        .await
        .unwrap();

    let failure = run.failure.unwrap();
    assert_eq!(failure.step, ProvisionStep::CreateWebhook);
    assert_eq!(failure.code, "RATE_LIMIT");
    assert!(failure.retry);
}

#[tokio::test]
async fn resume_past_api_key_mints_a_fresh_key() {
    let server = MockServer::start().await;
    // The application step is skipped entirely on resume.
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/organizations/{TTN_ORG}/applications")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_create_api_key(&server).await;
    mount_create_webhook(&server).await;

    let client = client_for(&server);
    let mut resumed = request();
    resumed.resume_from = Some(ProvisionStep::SaveCredentials);
    let run = ProvisionExecutor::new(&client, TTN_ORG, "https://ingest.frostguard.io")
        .execute(&resumed)
        .await
        .unwrap();

    assert!(run.failure.is_none());
    assert!(run.artifacts.api_key.is_some());
    assert!(!run.completed.contains(&ProvisionStep::CreateApplication));
}

#[tokio::test]
async fn webhook_body_carries_base_url_and_path() {
    let server = MockServer::start().await;
    mount_create_application(&server, 200).await;
    mount_create_api_key(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/as/webhooks/{APP}")))
        .and(body_partial_json(json!({
            "base_url": "https://ingest.frostguard.io",
            "format": "json",
            "uplink_message": {"path": "/uplink"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let run = ProvisionExecutor::new(&client, TTN_ORG, "https://ingest.frostguard.io")
        .execute(&request())
        .await
        .unwrap();
    assert!(run.failure.is_none());
}
