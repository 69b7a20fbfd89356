//! Integration tests for the HTTP remote using wiremock

use serde_json::json;
use stratoflow_engine::{RemoteApi, RemoteCall, RequestPayload};
use stratoflow_remote_http::{HttpRemote, HttpRemoteConfig};
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote(endpoint: &str, requests_per_second: u32) -> HttpRemote {
    HttpRemote::new(HttpRemoteConfig {
        endpoint: endpoint.to_string(),
        region: "ap-tokyo".to_string(),
        token: "test-token".to_string(),
        requests_per_second,
    })
    .unwrap()
}

fn payload(value: serde_json::Value) -> RequestPayload {
    value.as_object().cloned().unwrap()
}

/// Mount a one-shot response; mocks answer in mount order
async fn respond_once(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .respond_with(template)
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// Actions are posted to `{endpoint}/{Action}` with auth and region headers
#[tokio::test]
async fn test_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/CreateInstance"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("x-region", "ap-tokyo"))
        .and(header_exists("x-client-token"))
        .and(body_json(json!({"InstanceName": "x"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"Response": {"RequestId": "r-1", "InstanceId": "cdw-1"}}),
        ))
        .expect(1)
        .mount(&server)
        .await;
    let remote = remote(&server.uri(), 20);

    let call = RemoteCall::non_idempotent("CreateInstance", payload(json!({"InstanceName": "x"})));
    let fields = remote.invoke(&call).await.unwrap();
    assert_eq!(fields["InstanceId"], json!("cdw-1"));
    assert!(!fields.contains_key("RequestId"));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let token = received[0].headers.get("x-client-token").unwrap();
    assert_eq!(Some(token.to_str().unwrap()), call.client_token.as_deref());
}

/// Idempotent calls carry no client token
#[tokio::test]
async fn test_read_has_no_client_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/DescribeInstance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"Response": {"RequestId": "r-2", "Status": "serving"}}),
        ))
        .mount(&server)
        .await;
    let remote = remote(&server.uri(), 20);

    let call = RemoteCall::new("DescribeInstance", payload(json!({"InstanceId": "cdw-1"})));
    let fields = remote.invoke(&call).await.unwrap();
    assert_eq!(fields["Status"], json!("serving"));

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("x-client-token").is_none());
}

/// Retries of one call reuse its client token
#[tokio::test]
async fn test_client_token_stable_across_attempts() {
    let server = MockServer::start().await;
    respond_once(&server, ResponseTemplate::new(503).set_body_string("busy")).await;
    respond_once(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"Response": {"InstanceId": "cdw-1"}})),
    )
    .await;
    let remote = remote(&server.uri(), 20);

    let call = RemoteCall::non_idempotent("CreateInstance", payload(json!({"InstanceName": "x"})));
    assert!(remote.invoke(&call).await.unwrap_err().is_retryable());
    remote.invoke(&call).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(
        received[0].headers.get("x-client-token"),
        received[1].headers.get("x-client-token")
    );
}

/// Provider error codes and HTTP statuses are classified
#[tokio::test]
async fn test_error_classification() {
    let server = MockServer::start().await;
    respond_once(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"Response": {"RequestId": "r-3", "Error": {
            "Code": "ResourceNotFound.InstanceNotExist",
            "Message": "instance cdw-9 does not exist"
        }}})),
    )
    .await;
    respond_once(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"Response": {"RequestId": "r-4", "Error": {
            "Code": "RequestLimitExceeded",
            "Message": "slow down"
        }}})),
    )
    .await;
    respond_once(
        &server,
        ResponseTemplate::new(503).set_body_string("service unavailable"),
    )
    .await;
    respond_once(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({"Response": {"RequestId": "r-5", "Error": {
            "Code": "InvalidParameterValue.Spec",
            "Message": "unknown spec"
        }}})),
    )
    .await;
    let remote = remote(&server.uri(), 20);
    let call = RemoteCall::new("DescribeInstance", payload(json!({"InstanceId": "cdw-9"})));

    assert!(remote.invoke(&call).await.unwrap_err().is_not_found());
    assert!(remote.invoke(&call).await.unwrap_err().is_retryable());
    assert!(remote.invoke(&call).await.unwrap_err().is_retryable());

    let fatal = remote.invoke(&call).await.unwrap_err();
    assert!(!fatal.is_retryable() && !fatal.is_not_found());
    assert_eq!(fatal.code.as_deref(), Some("InvalidParameterValue.Spec"));
}

/// Over-budget calls fail fast without reaching the server
#[tokio::test]
async fn test_client_side_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"Response": {"RequestId": "r-6"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let remote = remote(&server.uri(), 1);
    let call = RemoteCall::new("DescribeInstance", payload(json!({"InstanceId": "cdw-1"})));

    remote.invoke(&call).await.unwrap();
    let err = remote.invoke(&call).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.code.as_deref(), Some("RateLimited"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

/// A refused connection is retryable
#[tokio::test]
async fn test_connection_refused_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let remote = remote(&endpoint, 20);
    let call = RemoteCall::new("DescribeInstance", RequestPayload::new());
    let err = remote.invoke(&call).await.unwrap_err();
    assert!(err.is_retryable());
}
