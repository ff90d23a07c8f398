//! Persistent push session.
//!
//! [`PushSession`] owns the broker socket and drives it through
//! `Disconnected → Connecting → AwaitingAuth → Registering → Active`, with
//! `Reconnecting` on any failure and a hand-off path that parks the live
//! socket with the background host before the process is suspended.
//!
//! # Tasks
//!
//! ```text
//!   PushSession (Arc<SessionInner>)
//!        │
//!        ├── receive loop ── PacketReader ─► handle_packet ─► events (broadcast)
//!        │                                      │
//!        │                                      └─► send (PUBACK, registration)
//!        ├── keep-alive loop ── PINGREQ every keep-alive − 60s
//!        │
//!        └── reconnect task (one at a time) ── sleep ─► start_fresh
//! ```
//!
//! Both loops share one `CancellationToken`. All writes go through a single
//! mutex-guarded write half. The receive loop returns its packet reader when
//! it is cancelled so the stream, plus any partial frame already buffered,
//! can be reassembled for hand-off.

// Rust guideline compliant 2026-02

mod events;
mod registration;
mod state;


pub use events::{MessageReceived, PushNotification};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::AuthenticatedApi;
use crate::config::SessionConfig;
use crate::connection_data::ConnectionData;
use crate::constants::SOCKET_ID;
use crate::device::DeviceDescriptor;
use crate::error::PushError;
use crate::handoff::HandoffCoordinator;
use crate::protocol::{
    codec, ConnAckPacket, ConnectParams, Packet, PacketReader, PublishPacket, Topic, PING_REQUEST,
};
use crate::store::ConnectionStore;
use crate::transport::{Connector, PushStream, ResumableStream};
use state::SessionState;

/// Capacity of the message event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

type BrokerReader = PacketReader<ReadHalf<PushStream>>;

/// External collaborators of a session.
#[derive(Debug, Clone)]
pub struct SessionDeps {
    /// Authenticated HTTP layer.
    pub api: Arc<dyn AuthenticatedApi>,
    /// Socket factory.
    pub connector: Arc<dyn Connector>,
    /// Background hand-off.
    pub handoff: HandoffCoordinator,
    /// Connection record persistence.
    pub store: Arc<dyn ConnectionStore>,
}

/// Handle to a push session. Cheap to clone; all clones drive one session.
#[derive(Debug, Clone)]
pub struct PushSession {
    inner: Arc<SessionInner>,
}

#[derive(Default)]
struct LoopHandles {
    cancel: Option<CancellationToken>,
    receive: Option<JoinHandle<Option<BrokerReader>>>,
    keepalive: Option<JoinHandle<()>>,
}

impl LoopHandles {
    fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    deps: SessionDeps,
    data: Mutex<ConnectionData>,
    state: Mutex<SessionState>,
    loops: Mutex<LoopHandles>,
    writer: tokio::sync::Mutex<Option<WriteHalf<PushStream>>>,
    events: broadcast::Sender<MessageReceived>,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("state", &self.state())
            .field("broker", &self.config.broker_host)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PushSession {
    /// Create a disconnected session.
    ///
    /// A stored token older than `config.token_max_age` is discarded and the
    /// user agent is filled in from `device` if missing; either change is
    /// persisted.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        device: &DeviceDescriptor,
        mut data: ConnectionData,
        deps: SessionDeps,
    ) -> Self {
        let had_token = data.has_token();
        let stale = data.discard_stale_token(Utc::now(), config.token_max_age);
        if stale && had_token {
            log::info!("[Push] Stored push token expired, will register again");
        }
        let ua_filled = data.ensure_user_agent(device);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(SessionInner {
            config,
            deps,
            data: Mutex::new(data),
            state: Mutex::new(SessionState::Disconnected),
            loops: Mutex::new(LoopHandles::default()),
            writer: tokio::sync::Mutex::new(None),
            events,
        });
        if stale || ua_filled {
            inner.persist();
        }
        Self { inner }
    }

    /// Subscribe to direct-message notifications, in wire order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MessageReceived> {
        self.inner.events.subscribe()
    }

    /// Whether the session currently owns a live connection attempt.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state().is_running()
    }

    /// Read-only copy of the connection record.
    #[must_use]
    pub fn connection_data(&self) -> ConnectionData {
        lock(&self.inner.data).clone()
    }

    /// Resume entry point.
    ///
    /// Reuses a socket parked with the background host when a token is
    /// stored, otherwise connects fresh. Does nothing if no user is logged in.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning`, `NetworkUnavailable` or `BackgroundAccessDenied`
    /// from the fresh start path.
    pub async fn start(&self) -> Result<(), PushError> {
        self.inner.start().await
    }

    /// Connect from scratch.
    ///
    /// Connect and send failures are not returned: they schedule a reconnect.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` unless the session is disconnected
    /// - `NetworkUnavailable` if the broker is unreachable (no retry)
    /// - `BackgroundAccessDenied` if hand-off cannot be armed (no connect)
    pub async fn start_fresh(&self) -> Result<(), PushError> {
        self.inner.start_fresh().await
    }

    /// Resume on a socket that is already connected and registered.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` unless the session is disconnected; the stream is
    /// dropped in that case.
    pub async fn start_with_existing_socket(&self, stream: PushStream) -> Result<(), PushError> {
        self.inner.resume_on(ResumableStream::new(stream)).await
    }

    /// Hand the live socket to the background host.
    ///
    /// Only acts while active. With `ping`, sends a final PINGREQ and waits
    /// the hand-off grace period first. Failures are logged; the session
    /// ends disconnected either way.
    pub async fn transfer_push_socket(&self, ping: bool) {
        self.inner.transfer_push_socket(ping).await;
    }

    /// Send a PINGREQ. No-op when not running; failures are logged.
    pub async fn send_ping(&self) {
        self.inner.send_ping().await;
    }

    /// Stop the session and suppress any pending reconnect.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    #[cfg(test)]
    fn state(&self) -> SessionState {
        self.inner.state()
    }
}

impl SessionInner {
    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != next {
            log::debug!("[Push] {} -> {next}", *state);
            *state = next;
        }
    }

    /// Move to `next` if the current state is one of `from`.
    fn transition(&self, from: &[SessionState], next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if from.contains(&*state) {
            log::debug!("[Push] {} -> {next}", *state);
            *state = next;
            true
        } else {
            false
        }
    }

    fn persist(&self) {
        let snapshot = lock(&self.data).clone();
        if let Err(e) = self.deps.store.save(&snapshot) {
            log::warn!("[Push] Failed to persist connection data: {e:#}");
        }
    }

    // ------------------------------------------------------------------
    // Start paths
    // ------------------------------------------------------------------

    async fn start(self: &Arc<Self>) -> Result<(), PushError> {
        if !self.deps.api.is_authenticated() {
            log::info!("[Push] Not logged in, push client not started");
            return Ok(());
        }
        if self.state() != SessionState::Disconnected {
            return Err(PushError::AlreadyRunning);
        }

        let has_token = lock(&self.data).has_token();
        match self.deps.handoff.lookup_existing_socket(SOCKET_ID) {
            Some(socket) if has_token => match self.resume_on(socket).await {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("[Push] Resume on parked socket failed: {e}"),
            },
            Some(_) => log::info!("[Push] Parked socket found without a token, starting fresh"),
            None => {}
        }
        self.start_fresh().await
    }

    fn start_fresh_boxed(self: Arc<Self>) -> BoxFuture<'static, Result<(), PushError>> {
        Box::pin(async move { self.start_fresh().await })
    }

    async fn start_fresh(self: &Arc<Self>) -> Result<(), PushError> {
        log::info!("[Push] Starting fresh");
        if !self.transition(&[SessionState::Disconnected], SessionState::Connecting) {
            return Err(PushError::AlreadyRunning);
        }

        let host = self.config.broker_host.as_str();
        let port = self.config.broker_port;
        if !self.deps.connector.is_reachable(host, port).await {
            log::info!("[Push] Network unavailable, not connecting");
            self.set_state(SessionState::Disconnected);
            return Err(PushError::NetworkUnavailable);
        }

        let frame = match self.connect_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("[Push] Failed to build CONNECT: {e}");
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        if !self.deps.handoff.ensure_tasks_registered().await {
            log::warn!("[Push] Background access unavailable, push client not started");
            self.set_state(SessionState::Disconnected);
            return Err(PushError::BackgroundAccessDenied);
        }

        let connected =
            tokio::time::timeout(self.config.connect_timeout, self.deps.connector.connect(host, port))
                .await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                log::warn!("[Push] Connect to {host}:{port} failed: {e}");
                self.schedule_reconnect();
                return Ok(());
            }
            Err(_) => {
                log::warn!("[Push] Connect to {host}:{port} timed out");
                self.schedule_reconnect();
                return Ok(());
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        *self.writer.lock().await = Some(writer);

        if let Err(e) = self.write_frame(&frame).await {
            log::warn!("[Push] Failed to send CONNECT: {e}");
            self.schedule_reconnect();
            return Ok(());
        }

        if !self.transition(&[SessionState::Connecting], SessionState::AwaitingAuth) {
            log::info!("[Push] Stopped while connecting");
            self.close_writer().await;
            return Ok(());
        }
        log::info!("[Push] CONNECT sent, awaiting CONNACK");
        self.spawn_receive_loop(PacketReader::new(reader));
        Ok(())
    }

    /// Resume on a connected, registered socket. Bytes buffered before the
    /// hand-off are decoded ahead of anything new on the stream.
    async fn resume_on(self: &Arc<Self>, socket: ResumableStream) -> Result<(), PushError> {
        log::info!(
            "[Push] Starting with existing socket ({} buffered bytes)",
            socket.pending.len()
        );
        if !self.transition(&[SessionState::Disconnected], SessionState::Active) {
            return Err(PushError::AlreadyRunning);
        }

        let ResumableStream { stream, pending } = socket;
        let (reader, writer) = tokio::io::split(stream);
        *self.writer.lock().await = Some(writer);
        self.spawn_receive_loop(PacketReader::with_buffered(reader, pending));
        self.spawn_keepalive();
        Ok(())
    }

    fn connect_frame(&self) -> Result<Vec<u8>, PushError> {
        let packet = {
            let mut data = lock(&self.data);
            data.renew_session_id(Utc::now());
            let mut packet = ConnectParams::from_connection_data(&data).into_packet();
            packet.keep_alive = self.config.keep_alive_secs;
            Packet::Connect(packet)
        };
        codec::encode(&packet)
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn spawn_receive_loop(self: &Arc<Self>, reader: BrokerReader) {
        let cancel = CancellationToken::new();
        let mut loops = lock(&self.loops);
        loops.cancel = Some(cancel.clone());

        let inner = Arc::clone(self);
        loops.receive = Some(tokio::spawn(async move { inner.receive_loop(reader, cancel).await }));
    }

    fn spawn_keepalive(self: &Arc<Self>) {
        let mut loops = lock(&self.loops);
        let Some(cancel) = loops.cancel.clone() else {
            return;
        };
        if loops.keepalive.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let inner = Arc::clone(self);
        loops.keepalive = Some(tokio::spawn(async move { inner.keepalive_loop(cancel).await }));
    }

    fn take_loops(&self) -> LoopHandles {
        let loops = std::mem::take(&mut *lock(&self.loops));
        loops.cancel();
        loops
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut reader: BrokerReader,
        cancel: CancellationToken,
    ) -> Option<BrokerReader> {
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Some(reader),
                result = reader.read_packet() => result,
            };

            let outcome = match result {
                Ok(packet) => self.handle_packet(packet).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                if cancel.is_cancelled() {
                    return Some(reader);
                }
                log::warn!("[Push] Receive loop failed: {e}");
                self.schedule_reconnect();
                return None;
            }
        }
    }

    async fn keepalive_loop(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.config.ping_interval();
        loop {
            self.send_ping().await;
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Packet handling
    // ------------------------------------------------------------------

    async fn handle_packet(self: &Arc<Self>, packet: Packet) -> Result<(), PushError> {
        match packet {
            Packet::ConnAck(ack) => self.on_connack(ack).await,
            Packet::Publish(publish) => {
                if let Some(ack) = Packet::ack_for(&publish) {
                    self.send(&ack).await?;
                }
                self.on_publish(publish).await
            }
            Packet::PubAck { packet_id } => {
                log::debug!("[Push] Received PUBACK for {packet_id}");
                Ok(())
            }
            Packet::PingResp => {
                log::debug!("[Push] Received PINGRESP");
                Ok(())
            }
            other => Err(PushError::malformed(format!(
                "{} is not expected from the broker",
                other.name()
            ))),
        }
    }

    async fn on_connack(self: &Arc<Self>, ack: ConnAckPacket) -> Result<(), PushError> {
        log::info!("[Push] Received CONNACK");
        if !ack.is_accepted() {
            return Err(PushError::HandshakeFailed(format!(
                "CONNACK refused with code {}",
                ack.return_code
            )));
        }

        let has_token = {
            let mut data = lock(&self.data);
            data.set_auth_blob(&ack.authentication);
            data.has_token()
        };
        self.persist();

        if has_token {
            if self.transition(&[SessionState::AwaitingAuth], SessionState::Active) {
                self.spawn_keepalive();
            }
            return Ok(());
        }

        self.transition(&[SessionState::AwaitingAuth], SessionState::Registering);
        log::info!("[Push] Requesting push token");
        self.send(&registration::registration_request()).await
    }

    async fn on_publish(self: &Arc<Self>, publish: PublishPacket) -> Result<(), PushError> {
        match publish.topic {
            Topic::Message => {
                self.on_message(&publish.payload);
                Ok(())
            }
            Topic::RegistrationResponse => self.on_registration_response(&publish.payload).await,
            other => {
                log::info!("[Push] Ignoring PUBLISH on topic {other}");
                Ok(())
            }
        }
    }

    async fn on_registration_response(self: &Arc<Self>, payload: &[u8]) -> Result<(), PushError> {
        log::info!("[Push] Received token to register");
        let token = registration::parse_registration_response(payload)?;

        let (known, device_id) = {
            let data = lock(&self.data);
            (data.push_token == token, data.device_id)
        };

        if !known {
            let api = self.deps.api.as_ref();
            if registration::register_token(api, &self.config, device_id, &token).await {
                lock(&self.data).set_push_token(&token, Utc::now());
                self.persist();
            }
        }

        if self.transition(
            &[SessionState::Registering, SessionState::AwaitingAuth],
            SessionState::Active,
        ) {
            log::info!("[Push] Push client active");
            self.spawn_keepalive();
        }
        Ok(())
    }

    fn on_message(&self, payload: &[u8]) {
        let json = String::from_utf8_lossy(payload);
        match MessageReceived::parse(&json) {
            Ok(message) if message.is_direct_message() => {
                if self.events.send(message).is_err() {
                    log::debug!("[Push] Direct message received with no subscribers");
                }
            }
            Ok(message) => {
                log::debug!(
                    "[Push] Ignoring notification with collapse key {:?}",
                    message.notification.collapse_key
                );
            }
            Err(e) => log::warn!("[Push] Failed to parse notification: {e}"),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    async fn send(&self, packet: &Packet) -> Result<(), PushError> {
        let frame = codec::encode(packet)?;
        self.write_frame(&frame).await?;
        log::trace!("[Push] Sent {}", packet.name());
        Ok(())
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), PushError> {
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| PushError::TransientIo("socket is closed".to_string()))?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn send_ping(&self) {
        if !self.state().is_running() {
            return;
        }
        match self.send(&PING_REQUEST).await {
            Ok(()) => log::debug!("[Push] Pinging push server"),
            Err(e) => log::info!("[Push] Failed to ping push server: {e}"),
        }
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                log::debug!("[Push] Socket shutdown: {e}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Stop paths
    // ------------------------------------------------------------------

    /// Enter `Reconnecting` and restart after the reconnect delay.
    ///
    /// Only one reconnect is pending at a time.
    fn schedule_reconnect(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if matches!(*state, SessionState::Reconnecting | SessionState::Disconnected) {
                return;
            }
            log::debug!("[Push] {} -> {}", *state, SessionState::Reconnecting);
            *state = SessionState::Reconnecting;
        }

        let loops = self.take_loops();
        let delay = self.config.reconnect_delay;
        log::info!("[Push] Reconnecting in {}s", delay.as_secs());

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(keepalive) = loops.keepalive {
                keepalive.abort();
            }
            inner.close_writer().await;
            tokio::time::sleep(delay).await;

            if !inner.transition(&[SessionState::Reconnecting], SessionState::Disconnected) {
                log::debug!("[Push] Reconnect superseded");
                return;
            }
            if let Err(e) = inner.start_fresh_boxed().await {
                log::warn!("[Push] Reconnect failed: {e}");
            }
        });
    }

    async fn transfer_push_socket(self: &Arc<Self>, ping: bool) {
        if !self.deps.api.is_authenticated() || self.state() != SessionState::Active {
            log::debug!("[Push] Nothing to transfer ({})", self.state());
            return;
        }

        log::info!("[Push] Transferring socket");
        if ping {
            self.send_ping().await;
            tokio::time::sleep(self.config.handoff_grace).await;
        }

        if !self.transition(&[SessionState::Active], SessionState::Disconnected) {
            log::info!("[Push] Session left active state during hand-off grace");
            return;
        }

        let loops = self.take_loops();
        if let Some(keepalive) = loops.keepalive {
            keepalive.abort();
        }
        let reader = match loops.receive {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };
        let writer = self.writer.lock().await.take();

        match (reader.map(PacketReader::into_parts), writer) {
            (Some((reader, pending)), Some(writer)) if reader.is_pair_of(&writer) => {
                let socket = ResumableStream::with_pending(reader.unsplit(writer), pending);
                let standby = self.config.ping_interval();
                if let Err(e) = self.deps.handoff.transfer_socket(SOCKET_ID, socket, standby) {
                    log::warn!("[Push] Socket hand-off failed: {e:#}");
                }
            }
            _ => log::warn!("[Push] Socket halves unavailable, nothing handed off"),
        }
    }

    async fn shutdown(&self) {
        log::info!("[Push] Stopping push client");
        self.set_state(SessionState::Disconnected);
        let loops = self.take_loops();
        if let Some(keepalive) = loops.keepalive {
            keepalive.abort();
        }
        if let Some(receive) = loops.receive {
            receive.abort();
        }
        self.close_writer().await;
    }
}
