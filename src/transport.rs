//! Socket transport to the broker.
//!
//! The session talks to the network through a [`Connector`]: a reachability
//! probe and a connect call that yields a boxed duplex stream. The
//! production [`TlsConnector`] opens TCP with keep-alive and `TCP_NODELAY`
//! set and runs a rustls handshake (TLS 1.2+, webpki roots). Tests
//! substitute in-memory duplex pipes.

// Rust guideline compliant 2026-02

use std::io;
use std::sync::Arc;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};

/// Duplex byte stream the session can split into read and write halves.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncReadWrite for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned broker connection.
pub type PushStream = Box<dyn AsyncReadWrite>;

/// A broker connection together with bytes already read off it that no
/// packet has consumed yet.
///
/// This is what crosses the background hand-off: a receive loop cancelled
/// mid-frame leaves the head of that frame in `pending`, and whoever resumes
/// on the stream must decode `pending` first.
pub struct ResumableStream {
    /// The connection itself.
    pub stream: PushStream,
    /// Buffered bytes that precede anything still unread on `stream`.
    pub pending: BytesMut,
}

impl ResumableStream {
    /// Wrap a stream with nothing buffered.
    #[must_use]
    pub fn new(stream: PushStream) -> Self {
        Self::with_pending(stream, BytesMut::new())
    }

    /// Wrap a stream whose next bytes are `pending`.
    #[must_use]
    pub fn with_pending(stream: PushStream, pending: BytesMut) -> Self {
        Self { stream, pending }
    }
}

impl std::fmt::Debug for ResumableStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableStream")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Opens connections to the broker.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Whether `host` currently looks reachable. A negative answer aborts a
    /// start without scheduling a retry.
    async fn is_reachable(&self, host: &str, port: u16) -> bool;

    /// Open a connection to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> io::Result<PushStream>;
}

/// TLS-over-TCP connector.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Connector trusting the webpki root set.
    ///
    /// # Errors
    ///
    /// Fails if the crypto provider rejects the default protocol versions.
    pub fn new() -> anyhow::Result<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn is_reachable(&self, host: &str, port: u16) -> bool {
        match tokio::net::lookup_host((host, port)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                log::debug!("[Push] Lookup of {host} failed: {e}");
                false
            }
        }
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<PushStream> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let tcp = open_tcp(host, port).await?;

        let tls = self.inner.connect(server_name, tcp).await?;
        log::debug!("[Push] TLS established with {host}:{port}");
        Ok(Box::new(tls))
    }
}

/// Unconnected socket for `addr` with keep-alive and `TCP_NODELAY` on.
fn broker_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(true)?;
    socket.set_nodelay(true)?;
    Ok(socket)
}

/// Connect to the first address of `host:port` that accepts.
async fn open_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in tokio::net::lookup_host((host, port)).await? {
        match broker_socket(addr)?.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("[Push] Connect to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_connector_builds() {
        let connector = TlsConnector::new().expect("connector");
        assert!(format!("{connector:?}").starts_with("TlsConnector"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_server_name() {
        let connector = TlsConnector::new().expect("connector");
        let err = connector
            .connect("not a hostname", 443)
            .await
            .err()
            .expect("invalid name");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_broker_socket_options() {
        let socket = broker_socket("127.0.0.1:0".parse().expect("addr")).expect("socket");
        assert!(socket.keepalive().expect("keepalive"));
        assert!(socket.nodelay().expect("nodelay"));
    }

    #[tokio::test]
    async fn test_open_tcp_sets_nodelay() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });

        let stream = open_tcp("127.0.0.1", port).await.expect("connect");
        assert!(stream.nodelay().expect("nodelay"));
        accept.await.expect("join").expect("accept");
    }

    #[test]
    fn test_resumable_stream_debug_hides_stream() {
        let (client, _server) = tokio::io::duplex(8);
        let resumable =
            ResumableStream::with_pending(Box::new(client), BytesMut::from(&b"abc"[..]));
        assert_eq!(format!("{resumable:?}"), "ResumableStream { pending: 3, .. }");
    }
}
