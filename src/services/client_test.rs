use super::*;
use crate::state::test_helpers::MockService;

#[test]
fn endpoint_paths() {
    assert_eq!(Endpoint::Verify.path(), "/verify");
    assert_eq!(Endpoint::UserInfo.path(), "/user_info");
    assert_eq!(Endpoint::LongToken.path(), "/long_token");
    assert_eq!(Endpoint::Logout.path(), "/logout");
    assert_eq!(Endpoint::ReportIncident.path(), "/report_incident");
}

#[test]
fn http_client_builds_endpoint_urls() {
    let client = HttpAuthService::new("https://auth.example.com/", ServiceTimeouts::default()).unwrap();
    assert_eq!(client.url(Endpoint::Verify), "https://auth.example.com/verify");
    assert_eq!(client.url(Endpoint::UserInfo), "https://auth.example.com/user_info");
}

#[test]
fn service_error_display() {
    let err = ServiceError::Decode { status: 502 };
    assert!(err.to_string().contains("non-JSON"));
    assert!(err.to_string().contains("502"));
    let err = ServiceError::Request("connection refused".into());
    assert!(err.to_string().contains("connection refused"));
}

// =============================================================================
// default trait methods
// =============================================================================

#[tokio::test]
async fn verify_posts_token_payload() {
    let mock = MockService::new().reply(Endpoint::Verify, 200, serde_json::json!({ "status_machine": "OK" }));
    let reply = mock.verify("abc").await.unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(mock.payloads(Endpoint::Verify), vec![serde_json::json!({ "token": "abc" })]);
}

#[tokio::test]
async fn report_incident_posts_attempt() {
    let mock = MockService::new().reply(Endpoint::ReportIncident, 200, serde_json::json!({ "status_machine": "OK" }));
    mock.report_incident("abc", "set role", serde_json::json!(9))
        .await
        .unwrap();
    let payloads = mock.payloads(Endpoint::ReportIncident);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["tried_to"], "set role");
    assert_eq!(payloads[0]["value"], 9);
}
