//! Token registration handshake.
//!
//! Two halves: on the broker side the client publishes its application
//! identity and gets a device token back; on the REST side that token is
//! bound to the logged-in user.

// Rust guideline compliant 2026-02

use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AuthenticatedApi;
use crate::config::SessionConfig;
use crate::constants::{PACKAGE_NAME, REGISTRATION_APP_ID};
use crate::error::PushError;
use crate::protocol::{Packet, PublishPacket, QoS, Topic};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistrationResponse {
    token: String,
    error: String,
}

/// PUBLISH asking the broker for a device token.
pub(crate) fn registration_request() -> Packet {
    let body = serde_json::json!({
        "pkg_name": PACKAGE_NAME,
        "appid": REGISTRATION_APP_ID,
    });
    let packet_id = rand::rng().random_range(1..=u16::MAX);
    Packet::Publish(PublishPacket::new(
        Topic::RegistrationRequest,
        QoS::AtLeastOnce,
        packet_id,
        body.to_string().into_bytes(),
    ))
}

/// Extract the token from a registration response payload.
///
/// A non-empty `error` or a missing token fails the handshake.
pub(crate) fn parse_registration_response(payload: &[u8]) -> Result<String, PushError> {
    let response: RegistrationResponse = serde_json::from_slice(payload)
        .map_err(|e| PushError::malformed(format!("registration response: {e}")))?;
    if !response.error.is_empty() {
        return Err(PushError::HandshakeFailed(response.error));
    }
    if response.token.is_empty() {
        return Err(PushError::HandshakeFailed(
            "registration response carried no token".to_string(),
        ));
    }
    Ok(response.token)
}

/// Form fields of the REST registration call.
pub(crate) fn registration_fields(
    api: &dyn AuthenticatedApi,
    device_id: Uuid,
    token: &str,
) -> Vec<(&'static str, String)> {
    let device_id = device_id.to_string();
    vec![
        ("device_type", "android_mqtt".to_string()),
        ("is_main_push_channel", "true".to_string()),
        ("device_sub_type", "2".to_string()),
        ("device_token", token.to_string()),
        ("_csrftoken", api.csrf_token()),
        ("guid", device_id.clone()),
        ("_uuid", device_id),
        (
            "users",
            api.logged_in_user_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
        ),
    ]
}

/// Bind `token` to the logged-in user.
///
/// Makes one call plus `config.registration_retries` retries, waiting
/// `config.registration_retry_delay` between attempts. Transport errors
/// count as failed attempts. Returns whether any attempt succeeded.
pub(crate) async fn register_token(
    api: &dyn AuthenticatedApi,
    config: &SessionConfig,
    device_id: Uuid,
    token: &str,
) -> bool {
    let fields = registration_fields(api, device_id, token);
    let attempts = config.registration_retries.saturating_add(1);

    for attempt in 1..=attempts {
        match api.post_form(&config.registration_url, &fields).await {
            Ok(response) if response.is_success => {
                log::info!("[Registration] Push token registered");
                return true;
            }
            Ok(response) => {
                log::warn!(
                    "[Registration] Attempt {attempt}/{attempts} returned status {}",
                    response.status
                );
            }
            Err(e) => {
                log::warn!("[Registration] Attempt {attempt}/{attempts} failed: {e:#}");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.registration_retry_delay).await;
        }
    }

    log::warn!("[Registration] Giving up, token left unregistered");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_request_shape() {
        match registration_request() {
            Packet::Publish(p) => {
                assert_eq!(p.topic, Topic::RegistrationRequest);
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert!(p.packet_id.is_some_and(|id| id != 0));
                let body: serde_json::Value = serde_json::from_slice(&p.payload).expect("json");
                assert_eq!(body["pkg_name"], "com.instagram.android");
                assert_eq!(body["appid"], "567067343352427");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_with_token() {
        let token = parse_registration_response(br#"{"token":"T","error":""}"#).expect("token");
        assert_eq!(token, "T");
        let token = parse_registration_response(br#"{"token":"T"}"#).expect("token");
        assert_eq!(token, "T");
    }

    #[test]
    fn test_response_with_error() {
        let err = parse_registration_response(br#"{"token":"","error":"bad"}"#).expect_err("error");
        assert_eq!(err, PushError::HandshakeFailed("bad".to_string()));
        let err = parse_registration_response(br#"{}"#).expect_err("no token");
        assert!(matches!(err, PushError::HandshakeFailed(_)));
        let err = parse_registration_response(b"nope").expect_err("not json");
        assert!(matches!(err, PushError::MalformedPacket(_)));
    }
}
