// Tests for the HTTP collaborator against a mock server.

use fbns_push::{AccountSession, AuthenticatedApi, ReqwestApi};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session() -> AccountSession {
    AccountSession {
        user_id: Some(1234),
        csrf_token: "csrf-abc".to_string(),
        cookie: Some("sessionid=s3cret".to_string()),
    }
}

#[tokio::test]
async fn test_post_form_sends_headers_and_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/push/register/"))
        .and(header("X-CSRFToken", "csrf-abc"))
        .and(header("Cookie", "sessionid=s3cret"))
        .and(header("User-Agent", "test-agent"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("device_token=T"))
        .and(body_string_contains("device_type=android_mqtt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let api = ReqwestApi::new("test-agent", session()).expect("client");
    let uri = format!("{}/api/v1/push/register/", server.uri());
    let fields = [
        ("device_token", "T".to_string()),
        ("device_type", "android_mqtt".to_string()),
    ];
    let response = api.post_form(&uri, &fields).await.expect("response");

    assert!(response.is_success);
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_error_status_is_not_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let api = ReqwestApi::new("test-agent", session()).expect("client");
    let response = api
        .post_form(&server.uri(), &[("a", "b".to_string())])
        .await
        .expect("response");

    assert!(!response.is_success);
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let api = ReqwestApi::new("test-agent", session()).expect("client");
    assert!(api.post_form(&uri, &[]).await.is_err());
}

#[test]
fn test_account_context() {
    let api = ReqwestApi::new("test-agent", session()).expect("client");
    assert!(api.is_authenticated());
    assert_eq!(api.logged_in_user_id(), Some(1234));
    assert_eq!(api.csrf_token(), "csrf-abc");

    let anonymous = ReqwestApi::new("test-agent", AccountSession::default()).expect("client");
    assert!(!anonymous.is_authenticated());
}
