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


//! Offline messenger backed by a JSON description of chats
//!
//! Used by the CLI and tests to drive the full login, scan and download flow
//! without a live service.
//!
//! ```json
//! {
//!   "login": { "code": "12345", "password": "secret" },
//!   "concurrent": true,
//!   "chats": [{
//!     "id": -100123, "title": "Media dump", "username": "media_dump",
//!     "messages": [{
//!       "id": 7, "date": "2024-05-01T10:00:00Z",
//!       "media": { "type": "document", "size": 11,
//!                  "attributes": [{ "type": "filename", "file_name": "notes.txt" }] },
//!       "source": { "kind": "inline", "content": "hello world" }
//!     }]
//!   }]
//! }
//! ```
//!
//! Media bytes come from the message `source`: inline text, a generated
//! pattern of a given size, a local file (relative to the fixture file) or an
//! `http(s)` URL streamed with reqwest. Without a source, a pattern of the
//! declared size is generated.

use super::{EntityHandle, Message, MessageMedia, Messenger, SignInOutcome};
use crate::auth::session::SessionToken;
use crate::error::{DownloaderError, Result};
use crate::scan::chat_ref::ChatRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const CHUNK_SIZE: usize = 64 * 1024;
const UNKNOWN_SIZE_FALLBACK: u64 = 4096;

/// Login requirements of the fixture account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureLogin {
    /// Code accepted by `sign_in`
    #[serde(default = "default_code")]
    pub code: String,
    /// Second factor; `None` means the account has none
    #[serde(default)]
    pub password: Option<String>,
    /// Blob exported after login and accepted by `connect`
    #[serde(default = "default_session")]
    pub session: String,
}

fn default_code() -> String {
    "12345".to_string()
}

fn default_session() -> String {
    "fixture-session".to_string()
}

impl Default for FixtureLogin {
    fn default() -> Self {
        Self {
            code: default_code(),
            password: None,
            session: default_session(),
        }
    }
}

/// Where the bytes of a fixture attachment come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    Inline { content: String },
    Generated { size: u64 },
    File { path: PathBuf },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMessage {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub media: Option<MessageMedia>,
    #[serde(default)]
    pub source: Option<MediaSource>,
}

impl FixtureMessage {
    fn to_message(&self) -> Message {
        Message {
            id: self.id,
            date: self.date,
            media: self.media.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureChat {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub invite: Option<String>,
    #[serde(default)]
    pub messages: Vec<FixtureMessage>,
}

impl FixtureChat {
    fn matches(&self, reference: &ChatRef) -> bool {
        match reference {
            ChatRef::Username(name) => self
                .username
                .as_deref()
                .map_or(false, |u| u.eq_ignore_ascii_case(name)),
            ChatRef::Id(id) => self.id == *id,
            ChatRef::Invite(hash) => self.invite.as_deref() == Some(hash.as_str()),
        }
    }

    fn handle(&self) -> EntityHandle {
        EntityHandle {
            id: self.id,
            title: self.title.clone(),
        }
    }
}

/// On-disk fixture document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub login: FixtureLogin,
    /// Whether one connection may serve parallel transfers
    #[serde(default = "default_concurrent")]
    pub concurrent: bool,
    /// Artificial delay after every written chunk
    #[serde(default)]
    pub chunk_delay_ms: u64,
    #[serde(default)]
    pub chats: Vec<FixtureChat>,
}

fn default_concurrent() -> bool {
    true
}

#[derive(Debug)]
struct FixtureData {
    fixture: Fixture,
    base_dir: PathBuf,
}

/// [`Messenger`] implementation over a [`Fixture`]
pub struct FixtureMessenger {
    data: Arc<FixtureData>,
    client: Client,
    connected: AtomicBool,
    authorized: AtomicBool,
    code_sent: AtomicBool,
    awaiting_password: AtomicBool,
}

impl FixtureMessenger {
    pub fn new(login: FixtureLogin, chats: Vec<FixtureChat>) -> Self {
        Self::from_fixture(
            Fixture {
                login,
                concurrent: true,
                chunk_delay_ms: 0,
                chats,
            },
            PathBuf::from("."),
        )
    }

    /// `base_dir` anchors relative `file` sources
    pub fn from_fixture(fixture: Fixture, base_dir: PathBuf) -> Self {
        Self::with_data(Arc::new(FixtureData { fixture, base_dir }), false)
    }

    fn with_data(data: Arc<FixtureData>, authorized: bool) -> Self {
        Self {
            data,
            client: Client::new(),
            connected: AtomicBool::new(authorized),
            authorized: AtomicBool::new(authorized),
            code_sent: AtomicBool::new(false),
            awaiting_password: AtomicBool::new(false),
        }
    }

    /// Load a fixture document from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let fixture: Fixture = serde_json::from_str(&json)?;

        let mut seen = HashSet::new();
        for chat in &fixture.chats {
            for msg in &chat.messages {
                if !seen.insert(msg.id) {
                    return Err(DownloaderError::invalid_input(format!(
                        "duplicate message id {} in fixture",
                        msg.id
                    )));
                }
            }
        }

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(path = %path.display(), chats = fixture.chats.len(), "Loaded fixture");
        Ok(Self::from_fixture(fixture, base_dir))
    }

    fn ensure_authorized(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DownloaderError::connection("not connected"));
        }
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(DownloaderError::NotAuthorized);
        }
        Ok(())
    }

    fn chat(&self, entity: &EntityHandle) -> Result<&FixtureChat> {
        self.data
            .fixture
            .chats
            .iter()
            .find(|c| c.id == entity.id)
            .ok_or_else(|| DownloaderError::EntityNotFound(entity.title.clone()))
    }

    fn source_for(&self, message: &Message) -> Option<MediaSource> {
        self.data
            .fixture
            .chats
            .iter()
            .flat_map(|c| c.messages.iter())
            .find(|m| m.id == message.id)
            .and_then(|m| m.source.clone())
    }

    async fn load_bytes(&self, source: MediaSource) -> Result<Vec<u8>> {
        match source {
            MediaSource::Inline { content } => Ok(content.into_bytes()),
            MediaSource::File { path } => {
                let path = if path.is_absolute() {
                    path
                } else {
                    self.data.base_dir.join(path)
                };
                Ok(tokio::fs::read(&path).await?)
            }
            MediaSource::Generated { .. } | MediaSource::Url { .. } => {
                Err(DownloaderError::internal("source is streamed"))
            }
        }
    }

    /// Writes `size` bytes of a repeating pattern one chunk at a time
    async fn write_generated(
        &self,
        size: u64,
        out: &mut File,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<()> {
        let mut chunk = Vec::with_capacity(CHUNK_SIZE);
        let mut written = 0u64;
        while written < size {
            let len = (size - written).min(CHUNK_SIZE as u64);
            chunk.clear();
            chunk.extend((written..written + len).map(|i| (i % 251) as u8));
            out.write_all(&chunk).await?;
            written += len;
            on_progress(written, size);
            self.pause().await;
        }
        Ok(())
    }

    async fn stream_url(
        &self,
        url: &str,
        out: &mut File,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<()> {
        let url = url::Url::parse(url)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length().unwrap_or(0);
        let mut stream = response.bytes_stream();

        let mut received = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            received += chunk.len() as u64;
            on_progress(received, total);
            self.pause().await;
        }
        Ok(())
    }

    async fn pause(&self) {
        if self.data.fixture.chunk_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.data.fixture.chunk_delay_ms)).await;
        }
    }
}

#[async_trait]
impl Messenger for FixtureMessenger {
    async fn connect(&self, session: Option<&SessionToken>) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        let restored = session
            .map(|t| t.as_bytes() == self.data.fixture.login.session.as_bytes())
            .unwrap_or(false);
        self.authorized.store(restored, Ordering::SeqCst);
        debug!(restored, "Fixture connected");
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn request_code(&self, _phone: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DownloaderError::connection("not connected"));
        }
        self.code_sent.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_in(&self, _phone: &str, code: &str) -> Result<SignInOutcome> {
        if !self.code_sent.load(Ordering::SeqCst) {
            return Err(DownloaderError::auth_failed("no login code was requested"));
        }
        if code != self.data.fixture.login.code {
            return Err(DownloaderError::auth_failed("the login code is invalid"));
        }
        if self.data.fixture.login.password.is_some() {
            self.awaiting_password.store(true, Ordering::SeqCst);
            return Ok(SignInOutcome::PasswordRequired);
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(SignInOutcome::Authorized)
    }

    async fn check_password(&self, password: &str) -> Result<()> {
        if !self.awaiting_password.load(Ordering::SeqCst) {
            return Err(DownloaderError::auth_failed("no password was requested"));
        }
        if self.data.fixture.login.password.as_deref() != Some(password) {
            return Err(DownloaderError::auth_failed("the password is invalid"));
        }
        self.awaiting_password.store(false, Ordering::SeqCst);
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn export_session(&self) -> Result<SessionToken> {
        self.ensure_authorized()?;
        Ok(SessionToken::new(
            self.data.fixture.login.session.clone().into_bytes(),
        ))
    }

    async fn resolve_entity(&self, reference: &ChatRef) -> Result<EntityHandle> {
        self.ensure_authorized()?;
        self.data
            .fixture
            .chats
            .iter()
            .find(|c| c.matches(reference))
            .map(FixtureChat::handle)
            .ok_or_else(|| DownloaderError::EntityNotFound(reference.to_string()))
    }

    async fn fetch_messages(&self, entity: &EntityHandle, limit: usize) -> Result<Vec<Message>> {
        self.ensure_authorized()?;
        let mut messages: Vec<Message> = self
            .chat(entity)?
            .messages
            .iter()
            .map(FixtureMessage::to_message)
            .collect();
        messages.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn fetch_message(&self, entity: &EntityHandle, message_id: i64) -> Result<Option<Message>> {
        self.ensure_authorized()?;
        Ok(self
            .chat(entity)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(FixtureMessage::to_message))
    }

    async fn download_media(
        &self,
        message: &Message,
        dest: &Path,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<()> {
        self.ensure_authorized()?;
        let declared = match &message.media {
            Some(MessageMedia::Photo { size }) | Some(MessageMedia::Document { size, .. }) => *size,
            _ => return Err(DownloaderError::MediaUnavailable(message.id)),
        };
        let source = self.source_for(message).unwrap_or(MediaSource::Generated {
            size: declared.unwrap_or(UNKNOWN_SIZE_FALLBACK),
        });

        let mut out = File::create(dest).await?;
        match source {
            MediaSource::Url { url } => self.stream_url(&url, &mut out, on_progress).await?,
            MediaSource::Generated { size } => {
                self.write_generated(size, &mut out, on_progress).await?
            }
            source => {
                let bytes = self.load_bytes(source).await?;
                let total = bytes.len() as u64;
                let mut received = 0u64;
                for chunk in bytes.chunks(CHUNK_SIZE) {
                    out.write_all(chunk).await?;
                    received += chunk.len() as u64;
                    on_progress(received, total);
                    self.pause().await;
                }
            }
        }
        out.flush().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.code_sent.store(false, Ordering::SeqCst);
        self.awaiting_password.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn supports_concurrent_requests(&self) -> bool {
        self.data.fixture.concurrent
    }

    async fn open_secondary(&self) -> Result<Arc<dyn Messenger>> {
        self.ensure_authorized()?;
        Ok(Arc::new(Self::with_data(Arc::clone(&self.data), true)))
    }
}
