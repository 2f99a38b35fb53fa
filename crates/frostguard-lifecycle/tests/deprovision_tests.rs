//! Deprovision executor tests against a mock control plane.

use std::time::Duration;

use frostguard_db::StepStatus;
use frostguard_lifecycle::{DeprovisionExecutor, RunOutcome, RunReport};
use frostguard_ttn::classify::ErrorCode;
use frostguard_ttn::client::{TtnClient, TtnClientConfig};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> TtnClient {
    TtnClient::new(
        TtnClientConfig::new(server.uri(), "NNSXS.TESTKEY.ABCD").with_allow_insecure(),
    )
    .unwrap()
}

fn executor(client: &TtnClient) -> DeprovisionExecutor<'_> {
    DeprovisionExecutor::new(client)
        .with_propagation_delay(Duration::ZERO)
        .with_verify_retry_delay(Duration::ZERO)
}

const APP: &str = "fg-app-acme";
const DEVICE: &str = "eui-aabbccddeeff0011";
const DEV_EUI: &str = "AABBCCDDEEFF0011";

async fn mount_role_deletes(server: &MockServer, status: u16) {
    for prefix in ["", "/ns", "/as", "/js"] {
        Mock::given(method("DELETE"))
            .and(path(format!(
                "/api/v3{prefix}/applications/{APP}/devices/{DEVICE}"
            )))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({})))
            .mount(server)
            .await;
    }
}

fn empty_search() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "end_devices": [] }))
}

#[tokio::test]
async fn device_teardown_happy_path_succeeds() {
    let server = MockServer::start().await;
    mount_role_deletes(&server, 200).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/devices/{DEVICE}/purge")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/end_devices"))
        .respond_with(empty_search())
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_device(&mut report, APP, DEVICE, Some(DEV_EUI))
        .await;

    assert_eq!(report.outcome(), RunOutcome::Succeeded);
    assert!(report.failure.is_none());
    // 4 role deletes, 1 purge, 1 verification.
    assert_eq!(report.steps.len(), 6);
    let verify = report.steps.last().unwrap();
    assert_eq!(verify.step_name, "verify_release");
    assert_eq!(verify.status, StepStatus::Ok);
    assert!(verify.critical);
}

#[tokio::test]
async fn second_run_is_idempotent_on_404s() {
    let server = MockServer::start().await;
    mount_role_deletes(&server, 404).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/devices/{DEVICE}/purge")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/end_devices"))
        .respond_with(empty_search())
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_device(&mut report, APP, DEVICE, Some(DEV_EUI))
        .await;

    assert_eq!(report.outcome(), RunOutcome::Succeeded);
    let purge = report
        .steps
        .iter()
        .find(|s| s.step_name == "purge_device")
        .unwrap();
    assert_eq!(purge.status, StepStatus::Skipped);
}

#[tokio::test]
async fn purge_denied_blocks_the_run() {
    let server = MockServer::start().await;
    mount_role_deletes(&server, 200).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/devices/{DEVICE}/purge")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "no rights"})))
        .mount(&server)
        .await;
    // Verification is not attempted when the purge did not complete.
    Mock::given(method("GET"))
        .and(path("/api/v3/end_devices"))
        .respond_with(empty_search())
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_device(&mut report, APP, DEVICE, Some(DEV_EUI))
        .await;

    assert_eq!(report.outcome(), RunOutcome::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.code, ErrorCode::RightsError);
    assert!(failure.block);
}

#[tokio::test]
async fn still_registered_eui_is_a_critical_error() {
    let server = MockServer::start().await;
    mount_role_deletes(&server, 200).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/devices/{DEVICE}/purge")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    let still_there = json!({
        "end_devices": [{"ids": {"device_id": DEVICE, "dev_eui": DEV_EUI}}]
    });
    Mock::given(method("GET"))
        .and(path("/api/v3/end_devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(still_there))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_device(&mut report, APP, DEVICE, Some(DEV_EUI))
        .await;

    // Purge succeeded, verification failed.
    assert_eq!(report.outcome(), RunOutcome::Partial);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.code, ErrorCode::Unknown);
    assert!(failure.retry);
    let verify = report.steps.last().unwrap();
    assert_eq!(verify.status, StepStatus::Error);
}

#[tokio::test]
async fn organization_teardown_purges_app_and_org() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/applications/{APP}/devices")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "end_devices": [{"ids": {"device_id": DEVICE, "dev_eui": DEV_EUI}}]
        })))
        .mount(&server)
        .await;
    mount_role_deletes(&server, 200).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/devices/{DEVICE}/purge")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/end_devices"))
        .respond_with(empty_search())
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/purge")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v3/organizations/fg-org-acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v3/organizations/fg-org-acme/purge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_organization(&mut report, APP, Some("fg-org-acme"))
        .await;

    assert_eq!(report.outcome(), RunOutcome::Succeeded);
    let names: Vec<&str> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert!(names.contains(&"delete_application"));
    assert!(names.contains(&"purge_application"));
    assert!(names.contains(&"delete_organization"));
    assert!(names.contains(&"purge_organization"));
}

#[tokio::test]
async fn listing_failure_aborts_before_any_purge() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/applications/{APP}/devices")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/purge")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_organization(&mut report, APP, Some("fg-org-acme"))
        .await;

    assert_eq!(report.outcome(), RunOutcome::Failed);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].step_name, "list_devices");
    assert_eq!(report.steps[0].status, StepStatus::Error);
}

#[tokio::test]
async fn missing_application_tears_down_cleanly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/applications/{APP}/devices")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v3/applications/{APP}/purge")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v3/organizations/fg-org-acme"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v3/organizations/fg-org-acme/purge"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut report = RunReport::new();
    executor(&client)
        .run_organization(&mut report, APP, Some("fg-org-acme"))
        .await;

    assert_eq!(report.outcome(), RunOutcome::Succeeded);
}
