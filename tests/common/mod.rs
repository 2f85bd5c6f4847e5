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


//! Scripted messenger shared by the integration tests
//!
//! Transfers can be held back on a gate, and every call the core makes is
//! counted so tests can assert on what did and did not happen.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tgdl_core::auth::session::{SessionStore, SessionToken, SESSION_FILE_NAME};
use tgdl_core::config::AuthConfig;
use tgdl_core::error::{DownloaderError, Result};
use tgdl_core::messenger::{
    DocumentAttribute, EntityHandle, Message, MessageMedia, SignInOutcome,
};
use tgdl_core::{AuthSession, AuthState, ChatRef, Credentials, MediaItem, Messenger};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

pub const CHAT_USERNAME: &str = "media_archive";
pub const CHAT_ID: i64 = 777;
pub const VALID_TOKEN: &[u8] = b"scripted-session";
pub const LOGIN_CODE: &str = "24680";
pub const PHONE: &str = "+4712345678";

const CHUNK_SIZE: usize = 1024;

/// Behaviour of a [`ScriptedMessenger`]
pub struct Script {
    pub messages: Vec<Message>,
    /// Bytes actually written for a message, instead of its declared size
    pub payloads: HashMap<i64, Vec<u8>>,
    /// Messages whose transfer breaks halfway
    pub failing: HashSet<i64>,
    /// Second factor of the account
    pub password: Option<String>,
    pub concurrent: bool,
    /// Hold every transfer until [`ScriptedMessenger::release`] is called
    pub gated: bool,
    /// Hold `fetch_messages` until [`ScriptedMessenger::release_history`] is called
    pub gated_history: bool,
    /// Panic inside `request_code`
    pub panic_on_code_request: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            payloads: HashMap::new(),
            failing: HashSet::new(),
            password: None,
            concurrent: true,
            gated: false,
            gated_history: false,
            panic_on_code_request: false,
        }
    }
}

struct Counters {
    history_requests: AtomicUsize,
    code_requests: AtomicUsize,
    sign_ins: AtomicUsize,
    transfers: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    secondaries: AtomicUsize,
    disconnects: AtomicUsize,
    started: Mutex<Vec<i64>>,
}

struct Inner {
    script: Script,
    gate: Semaphore,
    history_gate: Semaphore,
    counters: Counters,
}

pub struct ScriptedMessenger {
    inner: Arc<Inner>,
    authorized: AtomicBool,
}

impl ScriptedMessenger {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                script,
                gate: Semaphore::new(0),
                history_gate: Semaphore::new(0),
                counters: Counters {
                    history_requests: AtomicUsize::new(0),
                    code_requests: AtomicUsize::new(0),
                    sign_ins: AtomicUsize::new(0),
                    transfers: AtomicUsize::new(0),
                    in_flight: AtomicUsize::new(0),
                    max_in_flight: AtomicUsize::new(0),
                    secondaries: AtomicUsize::new(0),
                    disconnects: AtomicUsize::new(0),
                    started: Mutex::new(Vec::new()),
                },
            }),
            authorized: AtomicBool::new(false),
        })
    }

    pub fn with_messages(messages: Vec<Message>) -> Arc<Self> {
        Self::new(Script {
            messages,
            ..Script::default()
        })
    }

    /// Let `n` more held transfers proceed
    pub fn release(&self, n: usize) {
        self.inner.gate.add_permits(n);
    }

    /// Let a held `fetch_messages` return
    pub fn release_history(&self) {
        self.inner.history_gate.add_permits(1);
    }

    /// Calls to `fetch_messages` so far, held ones included
    pub fn history_requests(&self) -> usize {
        self.inner.counters.history_requests.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> usize {
        self.inner.counters.code_requests.load(Ordering::SeqCst)
    }

    pub fn sign_ins(&self) -> usize {
        self.inner.counters.sign_ins.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> usize {
        self.inner.counters.transfers.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.counters.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn secondaries_opened(&self) -> usize {
        self.inner.counters.secondaries.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.inner.counters.disconnects.load(Ordering::SeqCst)
    }

    /// Message ids whose transfer began, in order
    pub fn started(&self) -> Vec<i64> {
        self.inner.counters.started.lock().unwrap().clone()
    }

    fn payload(&self, message: &Message) -> Vec<u8> {
        if let Some(bytes) = self.inner.script.payloads.get(&message.id) {
            return bytes.clone();
        }
        let size = match &message.media {
            Some(MessageMedia::Photo { size }) | Some(MessageMedia::Document { size, .. }) => {
                size.unwrap_or(CHUNK_SIZE as u64)
            }
            _ => 0,
        };
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    async fn write_payload(
        &self,
        message: &Message,
        dest: &Path,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<()> {
        let data = self.payload(message);
        let total = data.len() as u64;
        let breaks_at = if self.inner.script.failing.contains(&message.id) {
            data.len() / 2
        } else {
            usize::MAX
        };

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0usize;
        for chunk in data.chunks(CHUNK_SIZE) {
            if written >= breaks_at {
                file.flush().await?;
                return Err(DownloaderError::connection("connection reset during transfer"));
            }
            file.write_all(chunk).await?;
            written += chunk.len();
            on_progress(written as u64, total);
        }
        file.flush().await?;
        if breaks_at != usize::MAX {
            return Err(DownloaderError::connection("connection reset during transfer"));
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for ScriptedMessenger {
    async fn connect(&self, session: Option<&SessionToken>) -> Result<()> {
        if session.map_or(false, |t| t.as_bytes() == VALID_TOKEN) {
            self.authorized.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn request_code(&self, _phone: &str) -> Result<()> {
        self.inner.counters.code_requests.fetch_add(1, Ordering::SeqCst);
        if self.inner.script.panic_on_code_request {
            panic!("scripted failure in request_code");
        }
        Ok(())
    }

    async fn sign_in(&self, _phone: &str, code: &str) -> Result<SignInOutcome> {
        self.inner.counters.sign_ins.fetch_add(1, Ordering::SeqCst);
        if code != LOGIN_CODE {
            return Err(DownloaderError::auth_failed("invalid login code"));
        }
        if self.inner.script.password.is_some() {
            return Ok(SignInOutcome::PasswordRequired);
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(SignInOutcome::Authorized)
    }

    async fn check_password(&self, password: &str) -> Result<()> {
        if self.inner.script.password.as_deref() != Some(password) {
            return Err(DownloaderError::auth_failed("invalid password"));
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn export_session(&self) -> Result<SessionToken> {
        Ok(SessionToken::new(VALID_TOKEN.to_vec()))
    }

    async fn resolve_entity(&self, reference: &ChatRef) -> Result<EntityHandle> {
        let found = match reference {
            ChatRef::Username(name) => name.eq_ignore_ascii_case(CHAT_USERNAME),
            ChatRef::Id(id) => *id == CHAT_ID,
            ChatRef::Invite(_) => false,
        };
        if found {
            Ok(EntityHandle {
                id: CHAT_ID,
                title: "Media archive".to_string(),
            })
        } else {
            Err(DownloaderError::EntityNotFound(reference.to_string()))
        }
    }

    async fn fetch_messages(&self, _entity: &EntityHandle, limit: usize) -> Result<Vec<Message>> {
        self.inner
            .counters
            .history_requests
            .fetch_add(1, Ordering::SeqCst);
        if self.inner.script.gated_history {
            if let Ok(permit) = self.inner.history_gate.acquire().await {
                permit.forget();
            }
        }
        let mut messages = self.inner.script.messages.clone();
        messages.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn fetch_message(&self, _entity: &EntityHandle, message_id: i64) -> Result<Option<Message>> {
        Ok(self
            .inner
            .script
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn download_media(
        &self,
        message: &Message,
        dest: &Path,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<()> {
        let counters = &self.inner.counters;
        counters.transfers.fetch_add(1, Ordering::SeqCst);
        counters.started.lock().unwrap().push(message.id);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.inner.script.gated {
            if let Ok(permit) = self.inner.gate.acquire().await {
                permit.forget();
            }
        }
        let result = self.write_payload(message, dest, on_progress).await;

        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn supports_concurrent_requests(&self) -> bool {
        self.inner.script.concurrent
    }

    async fn open_secondary(&self) -> Result<Arc<dyn Messenger>> {
        self.inner.counters.secondaries.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedMessenger {
            inner: Arc::clone(&self.inner),
            authorized: AtomicBool::new(true),
        }))
    }
}

pub fn credentials() -> Credentials {
    Credentials::new(123456, "0123456789abcdef0123456789abcdef", PHONE)
}

pub fn session_store(dir: &Path) -> SessionStore {
    SessionStore::new(dir.join(SESSION_FILE_NAME))
}

pub fn new_session(messenger: Arc<ScriptedMessenger>, dir: &Path) -> Arc<AuthSession> {
    Arc::new(AuthSession::new(
        messenger,
        credentials(),
        session_store(dir),
        AuthConfig::default(),
    ))
}

/// Session logged in through a previously stored token
pub async fn logged_in(messenger: Arc<ScriptedMessenger>, dir: &Path) -> Arc<AuthSession> {
    session_store(dir)
        .save(&SessionToken::new(VALID_TOKEN.to_vec()))
        .await
        .unwrap();
    let session = new_session(messenger, dir);
    session.start().unwrap().wait().await.unwrap();
    assert_eq!(session.state(), AuthState::Authenticated);
    session
}

fn date(id: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(id)
}

pub fn photo(id: i64, size: u64) -> Message {
    Message {
        id,
        date: date(id),
        media: Some(MessageMedia::Photo { size: Some(size) }),
    }
}

pub fn document(id: i64, name: &str, size: u64) -> Message {
    Message {
        id,
        date: date(id),
        media: Some(MessageMedia::Document {
            size: Some(size),
            attributes: vec![DocumentAttribute::Filename {
                file_name: name.to_string(),
            }],
        }),
    }
}

pub fn text(id: i64) -> Message {
    Message {
        id,
        date: date(id),
        media: None,
    }
}

/// Inventory entries matching `messages`, as a scan would produce them
pub fn items_for(messages: &[Message]) -> Vec<MediaItem> {
    let chat = ChatRef::Username(CHAT_USERNAME.to_string());
    messages
        .iter()
        .filter_map(|m| tgdl_core::scan::classify_message(&chat, m))
        .collect()
}

/// Poll until `condition` holds, panicking after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
