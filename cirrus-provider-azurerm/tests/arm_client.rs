//! Integration tests for the ARM client using wiremock
//!
//! These drive the client against mocked ARM endpoints: header-based
//! polling, error decoding, and retries of throttled requests.

use std::sync::Arc;
use std::time::Duration;

use cirrus_core::{
    CoreError, ManagementClient, Operation, OperationKind, PollStatus, PollStyle, ResourceIdentifier,
    Submitted,
};
use cirrus_provider_azurerm::ids::SUBNET;
use cirrus_provider_azurerm::{ArmClient, ProviderConfig, build_provider};
use serde_json::json;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_VERSION: &str = "2023-09-01";
const SUBNET_PATH: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/internal";

fn config(server: &MockServer) -> ProviderConfig {
    let mut config = ProviderConfig::new("0000", "test-token").with_endpoint(server.uri());
    config.poll_interval_secs = Some(1);
    config
}

fn client(server: &MockServer) -> ArmClient {
    ArmClient::new(&config(server)).unwrap()
}

fn subnet() -> ResourceIdentifier {
    SUBNET.parse(SUBNET_PATH).unwrap()
}

mod get {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .and(query_param("api-version", API_VERSION))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "internal",
                "properties": {"addressPrefix": "10.0.2.0/24"}
            })))
            .mount(&server)
            .await;

        let body = client(&server).get(&subnet(), API_VERSION).await.unwrap();
        assert_eq!(body.unwrap()["properties"]["addressPrefix"], "10.0.2.0/24");
    }

    #[tokio::test]
    async fn test_get_404_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "NotFound", "message": "Resource not found"}
            })))
            .mount(&server)
            .await;

        let body = client(&server).get(&subnet(), API_VERSION).await.unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_get_decodes_arm_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": "AuthorizationFailed",
                    "message": "The client does not have authorization"
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server).get(&subnet(), API_VERSION).await.unwrap_err();
        match err {
            CoreError::RemoteFailed {
                operation, code, message, ..
            } => {
                assert_eq!(operation, OperationKind::Read);
                assert_eq!(code, "AuthorizationFailed");
                assert_eq!(message, "The client does not have authorization");
            }
            other => panic!("expected RemoteFailed, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_throttling_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "internal"})))
            .mount(&server)
            .await;

        let body = client(&server).get(&subnet(), API_VERSION).await.unwrap();
        assert_eq!(body.unwrap()["name"], "internal");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_server_errors_become_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.max_retries = 1;
        let err = ArmClient::new(&config)
            .unwrap()
            .get(&subnet(), API_VERSION)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Transport { status: Some(503), .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}

mod submit {
    use super::*;

    #[tokio::test]
    async fn test_put_with_async_operation_header() {
        let server = MockServer::start().await;
        let operation_url = format!("{}/operations/op1", server.uri());
        Mock::given(method("PUT"))
            .and(path(SUBNET_PATH))
            .and(query_param("api-version", API_VERSION))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", operation_url.as_str())
                    .insert_header("Retry-After", "5")
                    .set_body_json(json!({"properties": {"provisioningState": "Updating"}})),
            )
            .mount(&server)
            .await;

        let operation = Operation::put(subnet(), API_VERSION, json!({"properties": {}}));
        let submitted = client(&server).submit(&operation).await.unwrap();
        match submitted {
            Submitted::Accepted(handle) => {
                assert_eq!(handle.style, PollStyle::AsyncOperation);
                assert_eq!(handle.url.as_deref(), Some(operation_url.as_str()));
                assert_eq!(handle.retry_after, Some(Duration::from_secs(5)));
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_put_completed_synchronously() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Succeeded"}
            })))
            .mount(&server)
            .await;

        let operation = Operation::put(subnet(), API_VERSION, json!({"properties": {}}));
        let submitted = client(&server).submit(&operation).await.unwrap();
        assert!(matches!(submitted, Submitted::Completed(Some(_))));
    }

    #[tokio::test]
    async fn test_put_without_headers_polls_provisioning_state() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "properties": {"provisioningState": "Updating"}
            })))
            .mount(&server)
            .await;

        let operation = Operation::put(subnet(), API_VERSION, json!({"properties": {}}));
        let submitted = client(&server).submit(&operation).await.unwrap();
        assert!(matches!(
            submitted,
            Submitted::Accepted(ref h) if h.style == PollStyle::ProvisioningState && h.url.is_none()
        ));
    }

    #[tokio::test]
    async fn test_delete_with_location_header() {
        let server = MockServer::start().await;
        let location = format!("{}/operationResults/op2", server.uri());
        Mock::given(method("DELETE"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
            .mount(&server)
            .await;

        let operation = Operation::delete(subnet(), API_VERSION);
        let submitted = client(&server).submit(&operation).await.unwrap();
        assert!(matches!(
            submitted,
            Submitted::Accepted(ref h) if h.style == PollStyle::Location && h.kind == OperationKind::Delete
        ));
    }

    #[tokio::test]
    async fn test_delete_of_missing_object() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let operation = Operation::delete(subnet(), API_VERSION);
        let submitted = client(&server).submit(&operation).await.unwrap();
        assert_eq!(submitted, Submitted::Completed(None));
    }

    #[tokio::test]
    async fn test_put_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "code": "NetcfgInvalidSubnet",
                    "message": "Subnet internal is not valid in virtual network vnet1."
                }
            })))
            .mount(&server)
            .await;

        let operation = Operation::put(subnet(), API_VERSION, json!({"properties": {}}));
        let err = client(&server).submit(&operation).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::RemoteFailed { ref code, .. } if code == "NetcfgInvalidSubnet"
        ));
    }
}

mod poll {
    use super::*;
    use cirrus_core::PollHandle;

    fn handle(style: PollStyle, url: Option<String>) -> PollHandle {
        PollHandle {
            target: subnet(),
            kind: OperationKind::CreateOrUpdate,
            api_version: API_VERSION,
            style,
            url,
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn test_async_operation_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/running"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "3")
                    .set_body_json(json!({"status": "InProgress"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/failed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": {"code": "InUseSubnetCannotBeDeleted", "message": "Subnet is in use"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let url = |name: &str| Some(format!("{}/operations/{}", server.uri(), name));

        assert_eq!(
            client
                .poll(&handle(PollStyle::AsyncOperation, url("running")))
                .await
                .unwrap(),
            PollStatus::InProgress {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert_eq!(
            client
                .poll(&handle(PollStyle::AsyncOperation, url("failed")))
                .await
                .unwrap(),
            PollStatus::Failed {
                code: "InUseSubnetCannotBeDeleted".to_string(),
                message: "Subnet is in use".to_string()
            }
        );
        assert_eq!(
            client
                .poll(&handle(PollStyle::AsyncOperation, url("done")))
                .await
                .unwrap(),
            PollStatus::Succeeded(None)
        );
    }

    #[tokio::test]
    async fn test_location_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operationResults/op"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operationResults/op"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client(&server);
        let handle = handle(
            PollStyle::Location,
            Some(format!("{}/operationResults/op", server.uri())),
        );
        assert!(matches!(
            client.poll(&handle).await.unwrap(),
            PollStatus::InProgress { .. }
        ));
        assert_eq!(client.poll(&handle).await.unwrap(), PollStatus::Succeeded(None));
    }

    #[tokio::test]
    async fn test_provisioning_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .and(query_param("api-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Failed"}
            })))
            .mount(&server)
            .await;

        let status = client(&server)
            .poll(&handle(PollStyle::ProvisioningState, None))
            .await
            .unwrap();
        assert!(matches!(status, PollStatus::Failed { ref code, .. } if code == "ProvisioningFailed"));
    }
}

/// A subnet created end to end through the provider and the HTTP client
#[tokio::test]
async fn test_subnet_lifecycle_over_http() {
    let server = MockServer::start().await;
    let operation_url = format!("{}/operations/create", server.uri());

    // Not there before the create, present afterwards
    Mock::given(method("GET"))
        .and(path(SUBNET_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SUBNET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": SUBNET_PATH,
            "name": "internal",
            "properties": {
                "addressPrefix": "10.0.2.0/24",
                "provisioningState": "Succeeded"
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SUBNET_PATH))
        .and(bearer_token("test-token"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Azure-AsyncOperation", operation_url.as_str())
                .insert_header("Retry-After", "0"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
        .mount(&server)
        .await;

    let client: Arc<dyn ManagementClient> = Arc::new(client(&server));
    let provider = build_provider(client, &config(&server));
    let subnets = provider.lifecycle("azurerm_subnet").unwrap();

    let desired = json!({
        "name": "internal",
        "resource_group_name": "rg1",
        "virtual_network_name": "vnet1",
        "address_prefixes": ["10.0.2.0/24"]
    });
    let applied = subnets.create(&desired).await.unwrap();
    assert_eq!(applied.id, SUBNET_PATH);
    assert_eq!(applied.state, desired);

    let puts: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .collect();
    let body: serde_json::Value = serde_json::from_slice(&puts[0].body).unwrap();
    assert_eq!(body, json!({"properties": {"addressPrefix": "10.0.2.0/24"}}));
}
