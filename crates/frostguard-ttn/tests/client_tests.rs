//! Integration tests for the TTN client using wiremock.
//!
//! Cover the uniform response contract (no errors on 4xx/5xx), bearer
//! credential handling, the cluster guard failing closed before any traffic,
//! and endpoint path construction.

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use frostguard_ttn::{ErrorCode, ServerRole, TtnClient, TtnClientConfig};

async fn client_for(server: &MockServer) -> TtnClient {
    TtnClient::new(
        TtnClientConfig::new(server.uri(), "NNSXS.TESTKEY.ABCD").with_allow_insecure(),
    )
    .expect("client should build")
}

#[tokio::test]
async fn bearer_credential_is_attached() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/applications/fg-app"))
        .and(header("Authorization", "Bearer NNSXS.TESTKEY.ABCD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": {"application_id": "fg-app"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client.get_application("fg-app").await.unwrap();
    assert!(response.ok);
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn http_errors_are_returned_not_thrown() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v3/applications/fg-app/devices/eui-aabbccddeeff0011/purge"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"message": "no rights"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client
        .purge_device("fg-app", "eui-aabbccddeeff0011")
        .await
        .unwrap();

    assert!(!response.ok);
    assert_eq!(response.status, 403);
    let classification = response.classification().unwrap();
    assert_eq!(classification.code, ErrorCode::RightsError);
    assert!(classification.block);
}

#[tokio::test]
async fn not_found_counts_as_gone_for_deletes() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v3/ns/applications/fg-app/devices/eui-aabbccddeeff0011"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "entity not found"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client
        .delete_device(ServerRole::Network, "fg-app", "eui-aabbccddeeff0011")
        .await
        .unwrap();

    assert!(response.is_gone_or_deleted());
    assert!(response
        .classification()
        .unwrap()
        .is_idempotent_delete_success());
}

#[tokio::test]
async fn cluster_guard_blocks_before_any_network_call() {
    let server = MockServer::start().await;

    // Zero requests expected: the guard must fail closed first.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let result = client
        .request_url(
            "cross_cluster_probe",
            reqwest::Method::GET,
            "https://eu1.cloud.thethings.network/api/v3/applications/fg-app",
            None,
        )
        .await;

    assert!(matches!(
        result,
        Err(frostguard_ttn::TtnError::Cluster(_))
    ));
    // Mock expectation of zero calls is verified on drop.
}

#[tokio::test]
async fn non_json_body_is_kept_raw() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/applications/fg-app"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client.get_application("fg-app").await.unwrap();

    assert_eq!(response.status, 502);
    assert_eq!(response.raw.as_deref(), Some("<html>bad gateway</html>"));
    assert!(response.snippet(10).starts_with("<html>"));
}

#[tokio::test]
async fn device_list_pagination_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/applications/fg-app/devices"))
        .and(query_param("field_mask", "ids"))
        .and(query_param("page_token", "tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "end_devices": [
                {"ids": {"device_id": "eui-aabbccddeeff0011", "dev_eui": "AABBCCDDEEFF0011"}}
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client.list_devices("fg-app", Some("tok-2")).await.unwrap();
    let page: frostguard_ttn::DeviceListPage = response.decode().unwrap();

    assert_eq!(page.end_devices.len(), 1);
    assert!(page.next_page_token.is_none());
}

#[tokio::test]
async fn dev_eui_search_decodes_empty_result() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/end_devices"))
        .and(query_param("dev_eui", "AABBCCDDEEFF0011"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client.search_end_devices("AABBCCDDEEFF0011").await.unwrap();
    let result: frostguard_ttn::EndDeviceSearchResult = response.decode().unwrap();
    assert!(result.end_devices.is_empty());
}

#[tokio::test]
async fn gateway_connection_stats_round_trip_times() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/gs/gateways/fg-gw-a00009ef/connection/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "connected_at": "2026-02-11T18:00:00Z",
            "last_uplink_received_at": "2026-02-11T18:04:31Z",
            "round_trip_times": {"min": "31ms", "max": "1.2s", "median": "45ms"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client
        .gateway_connection_stats("fg-gw-a00009ef")
        .await
        .unwrap();
    let stats: frostguard_ttn::ConnectionStats = response.decode().unwrap();

    let median = stats
        .round_trip_times
        .unwrap()
        .median_duration()
        .unwrap();
    assert_eq!(median, std::time::Duration::from_millis(45));
}

#[tokio::test]
async fn transport_failure_is_a_network_error() {
    // A server that is already stopped: connection refused. An exclusive
    // (non-pooled) server is required so the listener actually closes on drop.
    let server = MockServer::builder().start().await;
    let uri = server.uri();
    drop(server);

    let client =
        TtnClient::new(TtnClientConfig::new(uri, "NNSXS.TESTKEY.ABCD").with_allow_insecure())
            .unwrap();
    let result = client.get_application("fg-app").await;

    assert!(matches!(
        result,
        Err(frostguard_ttn::TtnError::Network { .. })
    ));
}
