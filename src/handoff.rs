//! Background hand-off of the live broker socket.
//!
//! When the process is about to be suspended, the session gives its socket
//! to a background host that keeps it open; on resume the session asks for
//! it back instead of reconnecting. The host is abstracted behind
//! [`BackgroundHost`]. [`HandoffCoordinator`] wraps the registration and
//! lookup steps the session performs, and [`SupervisedHost`] is an
//! in-process host that parks sockets in a supervised tokio task.
//!
//! # Flow
//!
//! ```text
//! start_fresh ──► ensure_tasks_registered ──► (access? register tasks, arm transfer)
//! suspend     ──► transfer_socket(id, socket, standby)
//! resume      ──► lookup_existing_socket(id) ──► Some(socket) | None
//! ```
//!
//! A socket crosses the hand-off as a [`ResumableStream`], carrying any
//! bytes the receive loop had read but not yet decoded.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::constants::{REPLY_ACTION_TASK, SOCKET_ACTIVITY_TASK};
use crate::transport::ResumableStream;

/// Outcome of a background access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    /// Background execution always allowed.
    AlwaysAllowed,
    /// Allowed, subject to resource policy.
    AllowedSubjectToSystemPolicy,
    /// Refused by the user.
    DeniedByUser,
    /// Refused by system policy.
    DeniedBySystemPolicy,
    /// The host could not decide.
    Unspecified,
}

impl AccessStatus {
    /// Whether background tasks may be registered.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::AlwaysAllowed | Self::AllowedSubjectToSystemPolicy)
    }
}

/// Event that wakes a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTrigger {
    /// Activity on a transferred socket.
    SocketActivity,
    /// User replied from a notification.
    NotificationReply,
}

/// What the host does with a parked socket during connected standby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyAction {
    /// Wake the task on socket activity.
    Wake,
    /// Keep the socket but do not wake.
    DoNotWake,
}

/// Background task registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRegistration {
    /// Task name, also used as entry point.
    pub name: &'static str,
    /// Trigger that starts the task.
    pub trigger: TaskTrigger,
}

/// Host environment able to keep a socket alive while the process sleeps.
#[async_trait]
pub trait BackgroundHost: Send + Sync + std::fmt::Debug {
    /// Ask for background execution access.
    async fn request_access(&self) -> AccessStatus;

    /// Whether a task named `name` is registered.
    fn task_exists(&self, name: &str) -> bool;

    /// Register a background task.
    fn register_task(&self, task: &TaskRegistration) -> Result<()>;

    /// Whether the host offers notification-reply triggers.
    fn supports_reply_trigger(&self) -> bool;

    /// Allow sockets to be transferred to the socket-activity task.
    fn enable_transfer_ownership(&self, action: StandbyAction) -> Result<()>;

    /// Take ownership of `socket` under `id` for up to `standby`.
    fn transfer_ownership(&self, id: &str, socket: ResumableStream, standby: Duration) -> Result<()>;

    /// Hand back the socket parked under `id`, if it is still held.
    fn take_socket(&self, id: &str) -> Option<ResumableStream>;

    /// Drop all task registrations.
    fn unregister_all(&self);
}

/// Drives the hand-off steps of the push session against a host.
#[derive(Debug, Clone)]
pub struct HandoffCoordinator {
    host: Arc<dyn BackgroundHost>,
}

impl HandoffCoordinator {
    /// Coordinator over `host`.
    #[must_use]
    pub fn new(host: Arc<dyn BackgroundHost>) -> Self {
        Self { host }
    }

    /// Make sure the background tasks exist and socket transfer is armed.
    ///
    /// Access is only requested when a task is missing. Returns `false` if
    /// access is refused, the socket-activity task cannot be registered, or
    /// transfer cannot be armed; the session must not connect then. A
    /// failing reply-task registration is tolerated.
    pub async fn ensure_tasks_registered(&self) -> bool {
        let socket_missing = !self.host.task_exists(SOCKET_ACTIVITY_TASK);
        let reply_missing =
            self.host.supports_reply_trigger() && !self.host.task_exists(REPLY_ACTION_TASK);

        if socket_missing || reply_missing {
            let access = self.host.request_access().await;
            if !access.is_granted() {
                log::warn!("[Handoff] Background access refused: {access:?}");
                return false;
            }
            log::info!("[Handoff] Background access granted");
        } else {
            log::debug!("[Handoff] Background tasks already registered");
        }

        if socket_missing {
            let task = TaskRegistration {
                name: SOCKET_ACTIVITY_TASK,
                trigger: TaskTrigger::SocketActivity,
            };
            if let Err(e) = self.host.register_task(&task) {
                log::warn!("[Handoff] Failed to register {SOCKET_ACTIVITY_TASK}: {e}");
                return false;
            }
        }

        if reply_missing {
            let task = TaskRegistration {
                name: REPLY_ACTION_TASK,
                trigger: TaskTrigger::NotificationReply,
            };
            if let Err(e) = self.host.register_task(&task) {
                log::warn!("[Handoff] Reply task unavailable: {e}");
            }
        }

        self.arm_transfer()
    }

    fn arm_transfer(&self) -> bool {
        match self.host.enable_transfer_ownership(StandbyAction::Wake) {
            Ok(()) => true,
            Err(e) => {
                log::info!("[Handoff] Connected standby wake unavailable ({e}), falling back");
                match self.host.enable_transfer_ownership(StandbyAction::DoNotWake) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("[Handoff] Cannot arm socket transfer: {e}");
                        false
                    }
                }
            }
        }
    }

    /// Reclaim a previously transferred socket.
    pub fn lookup_existing_socket(&self, id: &str) -> Option<ResumableStream> {
        let socket = self.host.take_socket(id);
        if let Some(socket) = &socket {
            log::info!(
                "[Handoff] Reclaimed parked socket {id} ({} buffered bytes)",
                socket.pending.len()
            );
        }
        socket
    }

    /// Give `socket` to the host for `standby`.
    ///
    /// # Errors
    ///
    /// Propagates the host's refusal; the socket is dropped in that case.
    pub fn transfer_socket(&self, id: &str, socket: ResumableStream, standby: Duration) -> Result<()> {
        let buffered = socket.pending.len();
        self.host.transfer_ownership(id, socket, standby)?;
        log::info!(
            "[Handoff] Socket {id} transferred with {buffered} buffered bytes, standby {}s",
            standby.as_secs()
        );
        Ok(())
    }

    /// Drop all task registrations (logout).
    pub fn unregister_all(&self) {
        self.host.unregister_all();
    }
}

struct ParkedSocket {
    socket: ResumableStream,
    generation: u64,
}

#[derive(Default)]
struct HostState {
    tasks: HashMap<String, TaskRegistration>,
    parked: HashMap<String, ParkedSocket>,
    standby_action: Option<StandbyAction>,
}

struct HostInner {
    access: Mutex<AccessStatus>,
    wake_supported: bool,
    reply_supported: bool,
    state: Mutex<HostState>,
    generation: AtomicU64,
}

/// In-process [`BackgroundHost`].
///
/// Parked sockets stay open until reclaimed or until their standby window
/// elapses, at which point a supervisor task closes them.
#[derive(Clone)]
pub struct SupervisedHost {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for SupervisedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedHost")
            .field("parked", &self.parked_count())
            .finish_non_exhaustive()
    }
}

impl Default for SupervisedHost {
    fn default() -> Self {
        Self::new(AccessStatus::AlwaysAllowed)
    }
}

impl SupervisedHost {
    /// Host answering access requests with `access`.
    #[must_use]
    pub fn new(access: AccessStatus) -> Self {
        Self::with_capabilities(access, true, true)
    }

    /// Host with explicit capabilities.
    #[must_use]
    pub fn with_capabilities(access: AccessStatus, wake_supported: bool, reply_supported: bool) -> Self {
        Self {
            inner: Arc::new(HostInner {
                access: Mutex::new(access),
                wake_supported,
                reply_supported,
                state: Mutex::new(HostState::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Change the answer to future access requests.
    pub fn set_access(&self, access: AccessStatus) {
        if let Ok(mut current) = self.inner.access.lock() {
            *current = access;
        }
    }

    /// Number of sockets currently parked.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.inner.state.lock().map(|s| s.parked.len()).unwrap_or_default()
    }

    /// Standby action armed by the last successful enable call.
    #[must_use]
    pub fn standby_action(&self) -> Option<StandbyAction> {
        self.inner.state.lock().ok().and_then(|s| s.standby_action)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> Result<T> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|e| anyhow!("background host state poisoned: {e}"))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl BackgroundHost for SupervisedHost {
    async fn request_access(&self) -> AccessStatus {
        self.inner
            .access
            .lock()
            .map(|a| *a)
            .unwrap_or(AccessStatus::Unspecified)
    }

    fn task_exists(&self, name: &str) -> bool {
        self.with_state(|s| s.tasks.contains_key(name)).unwrap_or(false)
    }

    fn register_task(&self, task: &TaskRegistration) -> Result<()> {
        if task.trigger == TaskTrigger::NotificationReply && !self.inner.reply_supported {
            return Err(anyhow!("notification reply trigger not supported"));
        }
        self.with_state(|s| {
            s.tasks
                .entry(task.name.to_string())
                .or_insert_with(|| task.clone());
        })
    }

    fn supports_reply_trigger(&self) -> bool {
        self.inner.reply_supported
    }

    fn enable_transfer_ownership(&self, action: StandbyAction) -> Result<()> {
        if action == StandbyAction::Wake && !self.inner.wake_supported {
            return Err(anyhow!("connected standby wake not supported"));
        }
        self.with_state(|s| {
            if s.tasks.contains_key(SOCKET_ACTIVITY_TASK) {
                s.standby_action = Some(action);
                Ok(())
            } else {
                Err(anyhow!("{SOCKET_ACTIVITY_TASK} is not registered"))
            }
        })?
    }

    fn transfer_ownership(&self, id: &str, socket: ResumableStream, standby: Duration) -> Result<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let replaced = self.with_state(|s| {
            if s.standby_action.is_none() {
                return Err(anyhow!("socket transfer is not enabled"));
            }
            Ok(s.parked
                .insert(id.to_string(), ParkedSocket { socket, generation })
                .is_some())
        })??;
        if replaced {
            log::warn!("[Handoff] Replaced an already parked socket for {id}");
        }

        let host = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(standby).await;
            let expired = host
                .with_state(|s| {
                    let current = s.parked.get(&id).is_some_and(|p| p.generation == generation);
                    if current {
                        s.parked.remove(&id)
                    } else {
                        None
                    }
                })
                .ok()
                .flatten();
            if let Some(parked) = expired {
                log::info!("[Handoff] Standby window for {id} elapsed, closing socket");
                drop(parked.socket);
            }
        });
        Ok(())
    }

    fn take_socket(&self, id: &str) -> Option<ResumableStream> {
        self.with_state(|s| s.parked.remove(id))
            .ok()
            .flatten()
            .map(|parked| parked.socket)
    }

    fn unregister_all(&self) {
        if let Err(e) = self.with_state(|s| {
            s.tasks.clear();
            s.standby_action = None;
        }) {
            log::error!("[Handoff] Failed to unregister tasks: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SOCKET_ID;

    fn coordinator(host: &SupervisedHost) -> HandoffCoordinator {
        HandoffCoordinator::new(Arc::new(host.clone()))
    }

    fn stream() -> ResumableStream {
        let (a, _b) = tokio::io::duplex(64);
        ResumableStream::new(Box::new(a))
    }

    #[tokio::test]
    async fn test_registers_both_tasks_and_arms_wake() {
        let host = SupervisedHost::default();
        assert!(coordinator(&host).ensure_tasks_registered().await);
        assert!(host.task_exists(SOCKET_ACTIVITY_TASK));
        assert!(host.task_exists(REPLY_ACTION_TASK));
        assert_eq!(host.standby_action(), Some(StandbyAction::Wake));
    }

    #[tokio::test]
    async fn test_denied_access_blocks_registration() {
        let host = SupervisedHost::new(AccessStatus::DeniedByUser);
        assert!(!coordinator(&host).ensure_tasks_registered().await);
        assert!(!host.task_exists(SOCKET_ACTIVITY_TASK));

        let host = SupervisedHost::new(AccessStatus::Unspecified);
        assert!(!coordinator(&host).ensure_tasks_registered().await);
    }

    #[tokio::test]
    async fn test_access_not_requested_once_registered() {
        let host = SupervisedHost::default();
        let coord = coordinator(&host);
        assert!(coord.ensure_tasks_registered().await);
        host.set_access(AccessStatus::DeniedBySystemPolicy);
        assert!(coord.ensure_tasks_registered().await);
    }

    #[tokio::test]
    async fn test_missing_reply_support_is_tolerated() {
        let host = SupervisedHost::with_capabilities(AccessStatus::AlwaysAllowed, false, false);
        assert!(coordinator(&host).ensure_tasks_registered().await);
        assert!(!host.task_exists(REPLY_ACTION_TASK));
        assert_eq!(host.standby_action(), Some(StandbyAction::DoNotWake));
    }

    #[tokio::test]
    async fn test_transfer_requires_armed_host() {
        let host = SupervisedHost::default();
        let err = coordinator(&host)
            .transfer_socket(SOCKET_ID, stream(), Duration::from_secs(1))
            .expect_err("not armed");
        assert!(err.to_string().contains("not enabled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parked_socket_reclaimed_then_gone() {
        let host = SupervisedHost::default();
        let coord = coordinator(&host);
        assert!(coord.ensure_tasks_registered().await);
        coord
            .transfer_socket(SOCKET_ID, stream(), Duration::from_secs(840))
            .expect("transfer");
        assert_eq!(host.parked_count(), 1);

        assert!(coord.lookup_existing_socket(SOCKET_ID).is_some());
        assert!(coord.lookup_existing_socket(SOCKET_ID).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parked_socket_keeps_buffered_bytes() {
        let host = SupervisedHost::default();
        let coord = coordinator(&host);
        assert!(coord.ensure_tasks_registered().await);
        let (a, _b) = tokio::io::duplex(64);
        let pending = bytes::BytesMut::from(&[0x32, 0x10][..]);
        let socket = ResumableStream::with_pending(Box::new(a), pending);
        coord
            .transfer_socket(SOCKET_ID, socket, Duration::from_secs(840))
            .expect("transfer");

        let reclaimed = coord.lookup_existing_socket(SOCKET_ID).expect("parked");
        assert_eq!(&reclaimed.pending[..], &[0x32, 0x10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parked_socket_expires_after_standby() {
        let host = SupervisedHost::default();
        let coord = coordinator(&host);
        assert!(coord.ensure_tasks_registered().await);
        coord
            .transfer_socket(SOCKET_ID, stream(), Duration::from_secs(10))
            .expect("transfer");

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(host.parked_count(), 0);
        assert!(coord.lookup_existing_socket(SOCKET_ID).is_none());
    }

    #[tokio::test]
    async fn test_unregister_all() {
        let host = SupervisedHost::default();
        let coord = coordinator(&host);
        assert!(coord.ensure_tasks_registered().await);
        coord.unregister_all();
        assert!(!host.task_exists(SOCKET_ACTIVITY_TASK));
        assert_eq!(host.standby_action(), None);
    }

    #[tokio::test]
    async fn test_unregister_all_survives_poisoned_state() {
        let host = SupervisedHost::default();
        assert!(coordinator(&host).ensure_tasks_registered().await);

        let poisoner = host.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.inner.state.lock();
            panic!("poison host state");
        })
        .join();
        assert!(joined.is_err());

        coordinator(&host).unregister_all();
        assert!(!host.task_exists(SOCKET_ACTIVITY_TASK));
        assert_eq!(host.parked_count(), 0);
    }
}
