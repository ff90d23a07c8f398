//! Session lifecycle states.

/// Where the push session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SessionState {
    /// No socket, no loops.
    #[default]
    Disconnected,
    /// Opening the socket and sending CONNECT.
    Connecting,
    /// CONNECT sent, waiting for CONNACK.
    AwaitingAuth,
    /// Registration request published, waiting for the token.
    Registering,
    /// Token known, keep-alive running.
    Active,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

impl SessionState {
    /// States in which the session owns a live socket.
    pub(crate) fn is_running(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingAuth | Self::Registering | Self::Active
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting-auth",
            Self::Registering => "registering",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}
