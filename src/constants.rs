//! Protocol and service constants for the push client.
//!
//! This module centralizes the fixed values of the push service: broker
//! endpoint, topic codes, CONNECT parameters, and the registration
//! endpoint. Tunable timings live in [`crate::config`]; the defaults for
//! those are declared here.
//!
//! # Categories
//!
//! - **Broker**: endpoint and MQTT-level constants
//! - **Connect payload**: client capability values sent in CONNECT
//! - **Registration**: REST endpoint and application identity
//! - **Timing**: default delays and intervals
//! - **Background**: hand-off task names and socket identifier

use std::time::Duration;

// ============================================================================
// Broker
// ============================================================================

/// Broker hostname.
pub const BROKER_HOST: &str = "mqtt-mini.facebook.com";

/// Broker TLS port.
pub const BROKER_PORT: u16 = 443;

/// Protocol name carried in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTToT";

/// Protocol level carried in CONNECT.
pub const PROTOCOL_LEVEL: u8 = 3;

/// CONNECT flags: username + password + clean session.
pub const CONNECT_FLAGS: u8 = 0xC2;

/// Keep-alive interval announced to the broker, in seconds.
pub const KEEP_ALIVE_SECS: u16 = 900;

/// Headroom subtracted from the keep-alive when scheduling pings and
/// the background standby window.
pub const KEEP_ALIVE_HEADROOM: Duration = Duration::from_secs(60);

/// Largest payload accepted after inflating a PUBLISH or CONNECT body.
pub const MAX_INFLATED_LEN: usize = 4 * 1024 * 1024;

// ============================================================================
// Connect payload
// ============================================================================

/// Client capability bitmask.
pub const CLIENT_CAPABILITIES: i64 = 439;

/// Endpoint capability bitmask.
pub const ENDPOINT_CAPABILITIES: i64 = 128;

/// Publish payload format (1 = zlib JSON).
pub const PUBLISH_FORMAT: i32 = 1;

/// Network type reported to the broker (1 = wifi).
pub const NETWORK_TYPE: i32 = 1;

/// Network subtype reported to the broker.
pub const NETWORK_SUBTYPE: i32 = 0;

/// Client type string.
pub const CLIENT_TYPE: &str = "device_auth";

/// Application id used in the CONNECT payload.
pub const CONNECT_APP_ID: i64 = 567_310_203_415_052;

/// Client stack identifier.
pub const CLIENT_STACK: i8 = 3;

/// Length of the MQTT client identifier derived from the device id.
pub const CLIENT_ID_LEN: usize = 20;

// ============================================================================
// Registration
// ============================================================================

/// REST endpoint that binds a broker-issued token to the logged-in user.
pub const REGISTRATION_URL: &str = "https://i.instagram.com/api/v1/push/register/";

/// Package name announced in the broker registration request.
pub const PACKAGE_NAME: &str = "com.instagram.android";

/// Application id announced in the broker registration request.
pub const REGISTRATION_APP_ID: &str = "567067343352427";

/// Collapse key of direct-message notifications. Only these are surfaced.
pub const DIRECT_MESSAGE_COLLAPSE_KEY: &str = "direct_v2_message";

// ============================================================================
// Timing
// ============================================================================

/// Delay between a failure and the reconnect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Grace period after the final ping before the socket is handed off.
pub const HANDOFF_GRACE: Duration = Duration::from_secs(2);

/// Delay before retrying a failed registration call.
pub const REGISTRATION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Number of registration retries after the first failed call.
pub const REGISTRATION_RETRIES: u32 = 1;

/// Upper bound on TCP connect + TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Push tokens older than this are discarded at session construction.
pub const TOKEN_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// HTTP client request timeout for the registration call.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Background
// ============================================================================

/// Identifier under which the live socket is handed to the background host.
pub const SOCKET_ID: &str = "mqtt_fbns";

/// Name and entry point of the socket-activity background task.
pub const SOCKET_ACTIVITY_TASK: &str = "BackgroundPushClient.SocketActivity";

/// Name and entry point of the notification-reply background task.
pub const REPLY_ACTION_TASK: &str = "BackgroundPushClient.ReplyAction";
