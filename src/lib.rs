//! fbns-push - persistent push-notification client for the FBNS broker.
//!
//! The crate keeps one authenticated MQTT-over-TLS connection to the push
//! broker, obtains a device push token, binds it to the logged-in account
//! over HTTP and surfaces direct-message notifications as typed events.
//! Before the process is suspended the live socket can be handed to a
//! background host and picked up again on resume without a new handshake.
//!
//! # Architecture
//!
//! - **Protocol** - MQTT framing, zlib payloads, Thrift CONNECT payload
//! - **Push** - session state machine, receive and keep-alive loops
//! - **Handoff** - background task registration and socket parking
//! - **Collaborators** - HTTP api, socket connector, connection store
//!
//! # Modules
//!
//! - [`protocol`] - packet types and codec
//! - [`push`] - the [`PushSession`]
//! - [`handoff`] - [`HandoffCoordinator`] and the in-process host
//! - [`config`] - configuration loading/saving

pub mod api;
pub mod config;
pub mod connection_data;
pub mod constants;
pub mod device;
pub mod error;
pub mod handoff;
pub mod protocol;
pub mod push;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use api::{AccountSession, AuthenticatedApi, ReqwestApi};
pub use config::{Config, SessionConfig};
pub use connection_data::ConnectionData;
pub use device::DeviceDescriptor;
pub use error::PushError;
pub use handoff::{BackgroundHost, HandoffCoordinator, SupervisedHost};
pub use push::{MessageReceived, PushNotification, PushSession, SessionDeps};
pub use store::{ConnectionStore, FileConnectionStore, MemoryConnectionStore};
pub use transport::{Connector, PushStream, ResumableStream, TlsConnector};
