//! Error taxonomy for the push client.
//!
//! Every failure the session can observe is mapped onto one of these
//! variants. Loop-level failures never reach callers directly: the session
//! logs them and converts them into a reconnect cycle. Only the start
//! preconditions (`NetworkUnavailable`, `BackgroundAccessDenied`,
//! `AlreadyRunning`) are returned to the caller.

// Rust guideline compliant 2026-02

/// Errors produced by the packet codec and the push session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// No connectivity; the start is aborted and no retry loop is started.
    NetworkUnavailable,
    /// The background host refused execution access; no connect is attempted.
    BackgroundAccessDenied,
    /// CONNACK refused or registration response carried an error.
    HandshakeFailed(String),
    /// Framing, decode or inflate failure.
    MalformedPacket(String),
    /// Socket read/write failure.
    TransientIo(String),
    /// A start was requested while the session is not disconnected.
    AlreadyRunning,
}

impl PushError {
    /// Whether the session answers this error with a reconnect cycle.
    #[must_use]
    pub fn triggers_reconnect(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_) | Self::MalformedPacket(_) | Self::TransientIo(_)
        )
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPacket(msg.into())
    }
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkUnavailable => write!(f, "Network unavailable"),
            Self::BackgroundAccessDenied => write!(f, "Background access denied"),
            Self::HandshakeFailed(msg) => write!(f, "Handshake failed: {msg}"),
            Self::MalformedPacket(msg) => write!(f, "Malformed packet: {msg}"),
            Self::TransientIo(msg) => write!(f, "Transient I/O failure: {msg}"),
            Self::AlreadyRunning => write!(f, "Push client is already running"),
        }
    }
}

impl std::error::Error for PushError {}

impl From<std::io::Error> for PushError {
    fn from(e: std::io::Error) -> Self {
        Self::TransientIo(e.to_string())
    }
}
