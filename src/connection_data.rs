//! Persisted state of the push connection.
//!
//! One record per device: the broker client id, the registered push token
//! and its age, the authentication blob the broker hands out in CONNACK,
//! and the user agent announced in CONNECT. The session is the only writer.

// Rust guideline compliant 2026-02

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::CLIENT_ID_LEN;
use crate::device::DeviceDescriptor;

/// Broker credentials parsed from the CONNACK authentication blob.
///
/// The blob is a JSON object with short keys. Missing keys default to
/// empty/zero, which yields an anonymous first CONNECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerAuth {
    /// Broker-side user id (`ck`).
    pub user_id: i64,
    /// Broker password (`cs`).
    pub password: String,
    /// Broker-issued device id (`di`).
    pub device_id: String,
    /// Broker-issued device secret (`ds`).
    pub device_secret: String,
}

impl BrokerAuth {
    /// Parse an authentication blob. Returns `None` if it is not a JSON object.
    #[must_use]
    pub fn parse(blob: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(blob).ok()?;
        let obj = value.as_object()?;
        let text = |key: &str| {
            obj.get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let user_id = obj
            .get("ck")
            .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()))
            .unwrap_or_default();
        Some(Self {
            user_id,
            password: text("cs"),
            device_id: text("di"),
            device_secret: text("ds"),
        })
    }
}

/// Persisted connection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    /// Device identity.
    pub device_id: Uuid,
    /// MQTT client identifier derived from `device_id`.
    pub client_id: String,
    /// Registered push token; empty until registration succeeds.
    #[serde(default)]
    pub push_token: String,
    /// When `push_token` was last set or cleared.
    pub push_token_updated_at: DateTime<Utc>,
    /// Raw CONNACK authentication payload.
    #[serde(default)]
    pub auth_blob: String,
    /// User agent announced in CONNECT.
    #[serde(default)]
    pub user_agent: String,
    /// Session id of the most recent CONNECT.
    #[serde(default)]
    pub mqtt_session_id: i64,
}

impl ConnectionData {
    /// Fresh record for `device`: no token, no broker credentials.
    #[must_use]
    pub fn new(device: &DeviceDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device.uuid,
            client_id: client_id_for(&device.uuid),
            push_token: String::new(),
            push_token_updated_at: now,
            auth_blob: String::new(),
            user_agent: device.user_agent(),
            mqtt_session_id: 0,
        }
    }

    /// Clear the push token if it is older than `max_age`.
    ///
    /// Returns `true` if the record changed and needs saving. A stale record
    /// has its timestamp reset to `now`, token or not, so it does not look
    /// stale again on the next check.
    pub fn discard_stale_token(&mut self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(self.push_token_updated_at) <= max_age {
            return false;
        }
        self.push_token.clear();
        self.push_token_updated_at = now;
        true
    }

    /// Whether a push token is stored.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.push_token.is_empty()
    }

    /// Record a successfully registered token.
    pub fn set_push_token(&mut self, token: &str, now: DateTime<Utc>) {
        self.push_token = token.to_string();
        self.push_token_updated_at = now;
    }

    /// Store the CONNACK authentication payload.
    ///
    /// Blobs that are not JSON objects are kept verbatim; the next CONNECT
    /// then goes out without broker credentials.
    pub fn set_auth_blob(&mut self, blob: &[u8]) {
        self.auth_blob = String::from_utf8_lossy(blob).into_owned();
        if !self.auth_blob.is_empty() && BrokerAuth::parse(&self.auth_blob).is_none() {
            log::warn!("[Push] CONNACK auth blob is not a JSON object, keeping it raw");
        }
    }

    /// Broker credentials from the stored blob (defaults when absent).
    #[must_use]
    pub fn broker_auth(&self) -> BrokerAuth {
        BrokerAuth::parse(&self.auth_blob).unwrap_or_default()
    }

    /// Start a new MQTT session and return its id.
    pub fn renew_session_id(&mut self, now: DateTime<Utc>) -> i64 {
        self.mqtt_session_id = now.timestamp_millis();
        self.mqtt_session_id
    }

    /// Fill in the user agent if the record predates it.
    pub fn ensure_user_agent(&mut self, device: &DeviceDescriptor) -> bool {
        if self.user_agent.is_empty() {
            self.user_agent = device.user_agent();
            return true;
        }
        false
    }

    /// Forget the token and broker credentials.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.push_token.clear();
        self.push_token_updated_at = now;
        self.auth_blob.clear();
        self.mqtt_session_id = 0;
    }

    /// Age of the stored token (or of the last reset).
    #[must_use]
    pub fn token_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.push_token_updated_at)
    }
}

fn client_id_for(device_id: &Uuid) -> String {
    device_id
        .simple()
        .to_string()
        .chars()
        .take(CLIENT_ID_LEN)
        .collect()
}
