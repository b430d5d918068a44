//! Proxy health: proxy mode, remote status and auto-block
//!
//! The [`HealthController`] owns the repository-wide health state of one
//! proxy repository. All transitions go through it so the forbidden ones
//! (`BLOCKED_MANUAL -> BLOCKED_AUTO`) and the backoff resets are enforced in
//! one place.
//!
//! ## Backoff
//!
//! A known remote status is trusted for a retain time. Outside auto-block
//! that is a constant. Entering `BLOCKED_AUTO` switches to a Fibonacci
//! sequence seeded at twice the connection timeout, stepped on every failed
//! unblock attempt and capped at one hour.

use depot_core::{ProxyMode, RemoteStatus, RepositoryEvent, StatusCheckMode};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ProxyConfig;
use crate::error::RepoError;
use crate::nfc::NotFoundCache;
use crate::remote::RemoteSource;

/// Upper bound of the auto-block retain time
pub const MAX_RETAIN_TIME: Duration = Duration::from_secs(60 * 60);

/// How long a known remote status is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainSequence {
    Constant(Duration),
    Fibonacci { a: Duration, b: Duration },
}

impl RetainSequence {
    pub fn constant(value: Duration) -> Self {
        RetainSequence::Constant(value)
    }

    pub fn fibonacci(seed: Duration) -> Self {
        RetainSequence::Fibonacci { a: seed, b: seed }
    }

    /// Current value without stepping
    pub fn peek(&self) -> Duration {
        match *self {
            RetainSequence::Constant(value) => value,
            RetainSequence::Fibonacci { a, .. } => a.min(MAX_RETAIN_TIME),
        }
    }

    /// Current value, then step
    pub fn next_retain_time(&mut self) -> Duration {
        let current = self.peek();
        if let RetainSequence::Fibonacci { a, b } = self {
            if *a < MAX_RETAIN_TIME {
                let next = a.saturating_add(*b);
                *a = *b;
                *b = next;
            }
        }
        current
    }
}

/// Health settings of a proxy repository
#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    pub auto_block_active: bool,
    pub status_check_mode: StatusCheckMode,
    pub connection_timeout: Duration,
    pub retain_time: Duration,
}

impl HealthSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            auto_block_active: config.auto_block_active,
            status_check_mode: config.status_check_mode,
            connection_timeout: config.connection_timeout,
            retain_time: config.remote_status_retain_time,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            auto_block_active: true,
            status_check_mode: StatusCheckMode::default(),
            connection_timeout: Duration::from_secs(60),
            retain_time: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug)]
struct HealthState {
    mode: ProxyMode,
    remote_status: RemoteStatus,
    status_updated: Option<Instant>,
    auto_block_active: bool,
    status_check_mode: StatusCheckMode,
    sequence: RetainSequence,
    retain: Duration,
}

/// Health state machine of one proxy repository
pub struct HealthController {
    repository: String,
    remote: Arc<dyn RemoteSource>,
    nfc: Arc<NotFoundCache>,
    connection_timeout: Duration,
    constant_retain: Duration,
    state: RwLock<HealthState>,
    in_service: AtomicBool,
    interrupt: Notify,
}

impl HealthController {
    pub fn new(
        repository: impl Into<String>,
        remote: Arc<dyn RemoteSource>,
        nfc: Arc<NotFoundCache>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            repository: repository.into(),
            remote,
            nfc,
            connection_timeout: settings.connection_timeout,
            constant_retain: settings.retain_time,
            state: RwLock::new(HealthState {
                mode: ProxyMode::Allow,
                remote_status: RemoteStatus::Unknown,
                status_updated: None,
                auto_block_active: settings.auto_block_active,
                status_check_mode: settings.status_check_mode,
                sequence: RetainSequence::constant(settings.retain_time),
                retain: settings.retain_time,
            }),
            in_service: AtomicBool::new(true),
            interrupt: Notify::new(),
        }
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        self.state.read().mode
    }

    /// Last determined remote status, without probing
    pub fn cached_status(&self) -> RemoteStatus {
        self.state.read().remote_status.clone()
    }

    /// How long the current status is trusted
    pub fn retain_time(&self) -> Duration {
        self.state.read().retain
    }

    pub fn auto_block_active(&self) -> bool {
        self.state.read().auto_block_active
    }

    pub fn status_check_mode(&self) -> StatusCheckMode {
        self.state.read().status_check_mode
    }

    pub fn set_status_check_mode(&self, mode: StatusCheckMode) {
        self.state.write().status_check_mode = mode;
        self.interrupt.notify_one();
    }

    pub fn in_service(&self) -> bool {
        self.in_service.load(Ordering::SeqCst)
    }

    pub fn set_in_service(&self, in_service: bool) {
        self.in_service.store(in_service, Ordering::SeqCst);
    }

    fn transition(
        &self,
        state: &mut HealthState,
        new: ProxyMode,
        cause: Option<String>,
    ) -> Option<RepositoryEvent> {
        let old = state.mode;
        if old == new {
            return None;
        }
        if old == ProxyMode::BlockedManual && new == ProxyMode::BlockedAuto {
            tracing::debug!(repository = %self.repository, "manual block wins over auto-block");
            return None;
        }

        state.mode = new;
        if new == ProxyMode::BlockedAuto {
            state.sequence = RetainSequence::fibonacci(self.connection_timeout.saturating_mul(2));
            state.retain = state.sequence.peek();
        } else {
            state.sequence = RetainSequence::constant(self.constant_retain);
            state.retain = self.constant_retain;
        }

        if !old.should_proxy() && new.should_proxy() && old != ProxyMode::BlockedAuto {
            self.nfc.purge();
            state.remote_status = RemoteStatus::Unknown;
            state.status_updated = None;
        }

        match new {
            ProxyMode::BlockedAuto => tracing::warn!(
                repository = %self.repository,
                remote = self.remote.remote_url(),
                cause = cause.as_deref().unwrap_or(""),
                retain_secs = state.retain.as_secs(),
                "remote auto-blocked"
            ),
            _ => tracing::warn!(
                repository = %self.repository,
                from = %old,
                to = %new,
                "proxy mode changed"
            ),
        }

        Some(RepositoryEvent::ProxyModeChanged {
            repository: self.repository.clone(),
            old,
            new,
            cause,
        })
    }

    /// Set the proxy mode (administrative or internal)
    pub fn set_proxy_mode(&self, mode: ProxyMode, cause: Option<String>) -> Option<RepositoryEvent> {
        let event = {
            let mut state = self.state.write();
            self.transition(&mut state, mode, cause)
        };
        if event.is_some() {
            self.interrupt.notify_one();
        }
        event
    }

    /// Enable or disable auto-block; disabling lifts an active auto-block
    pub fn set_auto_block_active(&self, active: bool) -> Option<RepositoryEvent> {
        let event = {
            let mut state = self.state.write();
            state.auto_block_active = active;
            if !active && state.mode == ProxyMode::BlockedAuto {
                self.transition(&mut state, ProxyMode::Allow, Some("auto-block disabled".into()))
            } else {
                None
            }
        };
        if event.is_some() {
            self.interrupt.notify_one();
        }
        event
    }

    /// Record the remote as unavailable and block it if auto-block allows
    ///
    /// While already auto-blocked this counts as a failed unblock attempt
    /// and steps the backoff.
    pub fn auto_block_proxying(&self, cause: &str) -> Option<RepositoryEvent> {
        let event = {
            let mut state = self.state.write();
            state.remote_status = RemoteStatus::unavailable(cause);
            state.status_updated = Some(Instant::now());

            match state.mode {
                ProxyMode::BlockedAuto => {
                    state.retain = state.sequence.next_retain_time();
                    tracing::debug!(
                        repository = %self.repository,
                        retain_secs = state.retain.as_secs(),
                        "remote still unavailable"
                    );
                    None
                }
                ProxyMode::Allow if state.auto_block_active => {
                    self.transition(&mut state, ProxyMode::BlockedAuto, Some(cause.to_string()))
                }
                _ => None,
            }
        };
        if event.is_some() {
            self.interrupt.notify_one();
        }
        event
    }

    /// Record the remote as available, lifting an auto-block
    pub fn auto_unblock(&self) -> Option<RepositoryEvent> {
        let event = {
            let mut state = self.state.write();
            state.remote_status = RemoteStatus::Available;
            state.status_updated = Some(Instant::now());
            if state.mode.should_auto_unblock() {
                self.transition(&mut state, ProxyMode::Allow, Some("remote available".into()))
            } else {
                None
            }
        };
        if event.is_some() {
            self.interrupt.notify_one();
        }
        event
    }

    /// Feed a remote failure; only outages count toward auto-block
    pub fn on_remote_failure(&self, error: &RepoError) -> Option<RepositoryEvent> {
        if error.is_remote_outage() {
            self.auto_block_proxying(&error.to_string())
        } else {
            None
        }
    }

    /// Remote credentials were replaced
    pub fn on_auth_changed(&self) -> Option<RepositoryEvent> {
        let event = {
            let mut state = self.state.write();
            state.remote_status = RemoteStatus::Unknown;
            state.status_updated = None;
            if state.mode == ProxyMode::BlockedAuto {
                self.transition(
                    &mut state,
                    ProxyMode::Allow,
                    Some("remote credentials changed".into()),
                )
            } else {
                None
            }
        };
        if event.is_some() {
            self.interrupt.notify_one();
        }
        event
    }

    /// Remote status, probing when `force` is set
    ///
    /// A status older than the retain time reverts to `Unknown`.
    pub async fn remote_status(&self, force: bool) -> RemoteStatus {
        {
            let mut state = self.state.write();
            if let Some(updated) = state.status_updated {
                if updated.elapsed() >= state.retain {
                    state.remote_status = RemoteStatus::Unknown;
                    state.status_updated = None;
                }
            }
            if !force {
                return state.remote_status.clone();
            }
        }
        self.check_remote_status().await.0
    }

    /// Probe the remote and apply auto-block or auto-unblock
    pub async fn check_remote_status(&self) -> (RemoteStatus, Option<RepositoryEvent>) {
        let mode = self.proxy_mode();
        if !mode.should_check_remote_status() {
            let status = RemoteStatus::unavailable(format!("proxy mode {}", mode));
            let mut state = self.state.write();
            state.remote_status = status.clone();
            state.status_updated = Some(Instant::now());
            return (status, None);
        }

        let event = match self.remote.is_reachable().await {
            Ok(true) => self.auto_unblock(),
            Ok(false) => self.auto_block_proxying("remote unreachable"),
            Err(e) if e.is_access_denied() => {
                let mut state = self.state.write();
                state.remote_status = RemoteStatus::unavailable(e.to_string());
                state.status_updated = Some(Instant::now());
                None
            }
            Err(e) => self.auto_block_proxying(&e.to_string()),
        };
        (self.cached_status(), event)
    }

    /// Whether the background loop should check the remote right now
    fn should_check(&self) -> bool {
        if !self.in_service() {
            return false;
        }
        let state = self.state.read();
        match state.status_check_mode {
            StatusCheckMode::Always => true,
            StatusCheckMode::AutoBlockedOnly => state.mode == ProxyMode::BlockedAuto,
            StatusCheckMode::Never => false,
        }
    }

    /// Spawn the background health check loop
    ///
    /// The loop sleeps for the current retain time, waking early when the
    /// proxy mode changes, and stops when `shutdown` turns true or its sender
    /// is dropped.
    pub fn spawn_status_checker(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = this.retain_time();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = this.interrupt.notified() => continue,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if this.should_check() {
                    let (status, event) = this.check_remote_status().await;
                    tracing::debug!(repository = %this.repository, %status, "remote status checked");
                    if let Some(RepositoryEvent::ProxyModeChanged { old, new, .. }) = event {
                        tracing::info!(repository = %this.repository, %old, %new, "health check changed proxy mode");
                    }
                }
            }
            tracing::debug!(repository = %this.repository, "health check stopped");
        })
    }
}

impl std::fmt::Debug for HealthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthController")
            .field("repository", &self.repository)
            .field("state", &*self.state.read())
            .finish()
    }
}
