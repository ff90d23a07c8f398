//! Notifications delivered on the message topic.
//!
//! The broker wraps each notification in an envelope whose `fbpushnotif`
//! field holds the notification itself, usually as a JSON document encoded
//! in a string. Both that form and an inline object are accepted.

use serde::{Deserialize, Deserializer};

use crate::constants::DIRECT_MESSAGE_COLLAPSE_KEY;

/// Fields of a push notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PushNotification {
    /// Title.
    #[serde(rename = "t")]
    pub title: String,
    /// Body text.
    #[serde(rename = "m")]
    pub message: String,
    /// Ticker text.
    #[serde(rename = "tt")]
    pub ticker_text: String,
    /// In-app action URI, e.g. `direct_v2?id=…&x=…`.
    #[serde(rename = "ig")]
    pub ig_action: String,
    /// Collapse key; direct messages use `direct_v2_message`.
    pub collapse_key: String,
    /// Optional image URL.
    #[serde(rename = "i")]
    pub optional_image: String,
    /// Optional avatar URL.
    #[serde(rename = "a")]
    pub optional_avatar_url: String,
    /// Sound name.
    pub sound: String,
    /// Push id.
    #[serde(rename = "pi")]
    pub push_id: String,
    /// Push category.
    #[serde(rename = "c")]
    pub push_category: String,
    /// Intended recipient user id.
    #[serde(rename = "u", deserialize_with = "string_or_number")]
    pub intended_recipient_user_id: String,
    /// Source user id.
    #[serde(rename = "s", deserialize_with = "string_or_number")]
    pub source_user_id: String,
    /// Badge count payload.
    #[serde(rename = "bc")]
    pub badge_count: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    token: String,
    #[serde(default, rename = "pn")]
    package_name: String,
    #[serde(default, rename = "nid")]
    notification_id: String,
    #[serde(default)]
    fbpushnotif: serde_json::Value,
}

/// A notification received on the message topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceived {
    /// Raw JSON payload as received.
    pub json: String,
    /// Token the notification was addressed to.
    pub token: String,
    /// Target package.
    pub package_name: String,
    /// Notification id.
    pub notification_id: String,
    /// Parsed notification.
    pub notification: PushNotification,
}

impl MessageReceived {
    /// Parse an inflated message payload.
    ///
    /// # Errors
    ///
    /// Fails if the envelope or the embedded notification is not valid JSON
    /// of the expected shape.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(json)?;
        let notification = match envelope.fbpushnotif {
            serde_json::Value::String(inner) => serde_json::from_str(&inner)?,
            serde_json::Value::Null => PushNotification::default(),
            other => serde_json::from_value(other)?,
        };
        Ok(Self {
            json: json.to_string(),
            token: envelope.token,
            package_name: envelope.package_name,
            notification_id: envelope.notification_id,
            notification,
        })
    }

    /// Whether this is a direct-message notification.
    #[must_use]
    pub fn is_direct_message(&self) -> bool {
        self.notification.collapse_key == DIRECT_MESSAGE_COLLAPSE_KEY
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_encoded_notification() {
        let inner = serde_json::json!({
            "t": "",
            "m": "alice: hi",
            "ig": "direct_v2?id=1&x=2",
            "collapse_key": "direct_v2_message",
            "u": 1234,
            "s": "5678",
        })
        .to_string();
        let json = serde_json::json!({
            "token": "T",
            "pn": "com.instagram.android",
            "nid": "n1",
            "fbpushnotif": inner,
        })
        .to_string();

        let msg = MessageReceived::parse(&json).expect("parse");
        assert!(msg.is_direct_message());
        assert_eq!(msg.json, json);
        assert_eq!(msg.notification.message, "alice: hi");
        assert_eq!(msg.notification.intended_recipient_user_id, "1234");
        assert_eq!(msg.notification.source_user_id, "5678");
        assert_eq!(msg.package_name, "com.instagram.android");
    }

    #[test]
    fn test_parse_inline_notification() {
        let json = r#"{"fbpushnotif":{"collapse_key":"like","m":"bob liked your post"}}"#;
        let msg = MessageReceived::parse(json).expect("parse");
        assert!(!msg.is_direct_message());
        assert_eq!(msg.notification.collapse_key, "like");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MessageReceived::parse("not json").is_err());
        assert!(MessageReceived::parse(r#"{"fbpushnotif":"{broken"}"#).is_err());
    }
}
