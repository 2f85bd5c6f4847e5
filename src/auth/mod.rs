// TgDL - Chat Media Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Login handshake and connection ownership
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Authenticated
//!                            -> CodeRequested -> Authenticated
//!                                             -> PasswordRequested -> Authenticated
//!                            -> Failed
//! ```
//!
//! Any error on the way moves the attempt to `Failed`. There is no retry;
//! the caller starts a new attempt with [`AuthSession::start`].
//!
//! # Code / password handoff
//!
//! The handshake task parks on a `oneshot` receiver until the front end calls
//! [`AuthHandle::submit_code`] or [`AuthHandle::submit_password`]. Dropping
//! the handle closes the slot and aborts the login. An optional prompt
//! timeout bounds each wait.
//!
//! # Connection lock
//!
//! Login, scan and download each hold an [`OperationGuard`] for their whole
//! run, so at most one of them is active per session.

pub mod session;

use crate::config::{AppConfig, AuthConfig, Credentials};
use crate::error::{DownloaderError, Result};
use crate::messenger::{Messenger, SignInOutcome};
use session::SessionStore;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Login state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Disconnected,
    Connecting,
    CodeRequested,
    PasswordRequested,
    Authenticated,
    Failed,
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthState::Disconnected | AuthState::Authenticated | AuthState::Failed
        )
    }
}

/// Events published by a running login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A one-time code was sent to this phone number
    CodeNeeded(String),
    PasswordNeeded,
    Success,
    Error(String),
}

/// Long-running operations that need exclusive use of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Login,
    Scan,
    Download,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Login => "login",
            OperationKind::Scan => "scan",
            OperationKind::Download => "download",
        };
        f.write_str(name)
    }
}

/// Exclusive claim on the connection, released on drop
#[derive(Debug)]
pub struct OperationGuard {
    kind: OperationKind,
    active: Arc<StdMutex<Option<OperationKind>>>,
    _lock: OwnedMutexGuard<()>,
}

impl OperationGuard {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
        debug!(operation = %self.kind, "Released connection");
    }
}

/// Owner of the messenger connection and its login state
pub struct AuthSession {
    messenger: Arc<dyn Messenger>,
    credentials: Credentials,
    store: SessionStore,
    config: AuthConfig,
    state: watch::Sender<AuthState>,
    op_lock: Arc<Mutex<()>>,
    active_op: Arc<StdMutex<Option<OperationKind>>>,
}

impl AuthSession {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        credentials: Credentials,
        store: SessionStore,
        config: AuthConfig,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Disconnected);
        Self {
            messenger,
            credentials,
            store,
            config,
            state,
            op_lock: Arc::new(Mutex::new(())),
            active_op: Arc::new(StdMutex::new(None)),
        }
    }

    /// Build a session from the application configuration
    pub fn from_config(messenger: Arc<dyn Messenger>, config: &AppConfig) -> Self {
        Self::new(
            messenger,
            config.credentials.clone(),
            SessionStore::new(config.session_path()),
            config.auth.clone(),
        )
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Observe state changes from any component
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn messenger(&self) -> Arc<dyn Messenger> {
        Arc::clone(&self.messenger)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Fails with `NotAuthorized` unless the login completed
    pub fn require_authenticated(&self) -> Result<()> {
        if self.state() == AuthState::Authenticated {
            Ok(())
        } else {
            Err(DownloaderError::NotAuthorized)
        }
    }

    /// Claim the connection for a long-running operation
    ///
    /// Never waits: if another operation holds the connection this fails
    /// right away with `OperationInProgress`.
    pub fn begin_operation(&self, kind: OperationKind) -> Result<OperationGuard> {
        let lock = match Arc::clone(&self.op_lock).try_lock_owned() {
            Ok(lock) => lock,
            Err(_) => {
                let running = self
                    .active_op
                    .lock()
                    .ok()
                    .and_then(|active| *active)
                    .unwrap_or(kind);
                warn!(requested = %kind, running = %running, "Connection busy");
                return Err(DownloaderError::OperationInProgress(running.to_string()));
            }
        };

        if let Ok(mut active) = self.active_op.lock() {
            *active = Some(kind);
        }
        debug!(operation = %kind, "Acquired connection");

        Ok(OperationGuard {
            kind,
            active: Arc::clone(&self.active_op),
            _lock: lock,
        })
    }

    fn set_state(&self, next: AuthState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "Auth state changed");
        }
    }

    /// Start a login attempt in the background
    pub fn start(self: &Arc<Self>) -> Result<AuthHandle> {
        match self.state() {
            AuthState::Authenticated => {
                return Err(DownloaderError::InvalidState(
                    "session is already authenticated".to_string(),
                ))
            }
            AuthState::Connecting | AuthState::CodeRequested | AuthState::PasswordRequested => {
                return Err(DownloaderError::OperationInProgress(
                    OperationKind::Login.to_string(),
                ))
            }
            AuthState::Disconnected | AuthState::Failed => {}
        }

        let guard = self.begin_operation(OperationKind::Login)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (code_tx, code_rx) = oneshot::channel();
        let (password_tx, password_rx) = oneshot::channel();

        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = guard;
            // Run the handshake in its own task so a panic still ends in `Failed`
            let handshake = {
                let session = Arc::clone(&session);
                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    session
                        .run_login(&events_tx, code_rx, password_rx)
                        .await
                })
            };
            let result = match handshake.await {
                Ok(result) => result,
                Err(e) => Err(DownloaderError::from(e)),
            };
            if let Err(ref e) = result {
                error!(error = %e, "Login failed");
                session.set_state(AuthState::Failed);
                let _ = events_tx.send(AuthEvent::Error(e.to_string()));
            }
            result
        });

        Ok(AuthHandle {
            events: events_rx,
            code: StdMutex::new(Some(code_tx)),
            password: StdMutex::new(Some(password_tx)),
            task,
        })
    }

    async fn run_login(
        &self,
        events: &mpsc::UnboundedSender<AuthEvent>,
        code_rx: oneshot::Receiver<String>,
        password_rx: oneshot::Receiver<String>,
    ) -> Result<()> {
        self.set_state(AuthState::Connecting);

        let token = self.store.load().await?;
        self.messenger.connect(token.as_ref()).await?;

        if self.messenger.is_authorized().await? {
            info!("Stored session is valid, skipping interactive login");
            self.set_state(AuthState::Authenticated);
            let _ = events.send(AuthEvent::Success);
            return Ok(());
        }
        if token.is_some() {
            warn!(path = %self.store.path().display(), "Stored session no longer authorizes the account");
        }

        let phone = self.credentials.phone.clone();
        self.messenger.request_code(&phone).await?;
        info!(phone = %self.credentials.masked_phone(), "Login code requested");
        self.set_state(AuthState::CodeRequested);
        let _ = events.send(AuthEvent::CodeNeeded(phone.clone()));

        let code = self.await_prompt(code_rx, "login code").await?;

        match self.messenger.sign_in(&phone, code.trim()).await? {
            SignInOutcome::Authorized => {}
            SignInOutcome::PasswordRequired => {
                self.set_state(AuthState::PasswordRequested);
                let _ = events.send(AuthEvent::PasswordNeeded);
                let password = self.await_prompt(password_rx, "password").await?;
                self.messenger.check_password(&password).await?;
            }
        }

        let token = self.messenger.export_session().await?;
        self.store.save(&token).await?;

        self.set_state(AuthState::Authenticated);
        let _ = events.send(AuthEvent::Success);
        Ok(())
    }

    async fn await_prompt(&self, slot: oneshot::Receiver<String>, prompt: &str) -> Result<String> {
        debug!(prompt, "Waiting for user input");
        let received = match self.config.prompt_timeout() {
            Some(limit) => tokio::time::timeout(limit, slot)
                .await
                .map_err(|_| DownloaderError::Timeout(limit.as_secs()))?,
            None => slot.await,
        };
        received.map_err(|_| DownloaderError::LoginAborted {
            prompt: prompt.to_string(),
        })
    }

    /// Close the connection and return to `Disconnected`
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.begin_operation(OperationKind::Login)?;
        self.messenger.disconnect().await?;
        self.set_state(AuthState::Disconnected);
        Ok(())
    }

    /// Disconnect and delete the stored session token
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.begin_operation(OperationKind::Login)?;
        if let Err(e) = self.messenger.disconnect().await {
            warn!(error = %e, "Disconnect during logout failed");
        }
        self.store.clear().await?;
        self.set_state(AuthState::Disconnected);
        info!("Logged out");
        Ok(())
    }
}

/// Front-end side of a running login attempt
pub struct AuthHandle {
    events: mpsc::UnboundedReceiver<AuthEvent>,
    code: StdMutex<Option<oneshot::Sender<String>>>,
    password: StdMutex<Option<oneshot::Sender<String>>>,
    task: JoinHandle<Result<()>>,
}

impl AuthHandle {
    /// Next event, `None` once the attempt has ended and all events were read
    pub async fn next_event(&mut self) -> Option<AuthEvent> {
        self.events.recv().await
    }

    pub fn submit_code(&self, code: impl Into<String>) -> Result<()> {
        Self::submit(&self.code, code.into(), "login code")
    }

    pub fn submit_password(&self, password: impl Into<String>) -> Result<()> {
        Self::submit(&self.password, password.into(), "password")
    }

    fn submit(
        slot: &StdMutex<Option<oneshot::Sender<String>>>,
        value: String,
        what: &str,
    ) -> Result<()> {
        let sender = slot
            .lock()
            .map_err(|_| DownloaderError::internal("prompt slot poisoned"))?
            .take()
            .ok_or_else(|| DownloaderError::InvalidState(format!("{} already submitted", what)))?;
        sender
            .send(value)
            .map_err(|_| DownloaderError::InvalidState(format!("login is no longer waiting for a {}", what)))
    }

    /// Wait for the attempt to finish
    pub async fn wait(self) -> Result<()> {
        let AuthHandle {
            events,
            code,
            password,
            task,
        } = self;
        drop(events);
        drop(code);
        drop(password);
        task.await?
    }
}
