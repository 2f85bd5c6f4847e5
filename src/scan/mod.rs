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


//! Media scan of a chat's recent history
//!
//! # Flow
//! 1. Parse and resolve the chat reference (fails with `EntityNotFound`)
//! 2. Fetch up to `limit` most recent messages
//! 3. Classify every message that carries downloadable media
//!
//! # Progress
//! - 10% once the request is validated
//! - 60% once the messages are fetched
//! - every `progress_every` messages: `min(95, 60 + 35 * i / total)`
//! - 100% and `Found(count)` at the end
//!
//! A stop request is honoured between messages; the items collected so far
//! become the result.

pub mod chat_ref;

use crate::auth::{AuthSession, OperationKind};
use crate::config::ScanConfig;
use crate::error::Result;
use crate::media::{MediaItem, MediaKind};
use crate::messenger::{DocumentAttribute, Message, MessageMedia};
use chat_ref::ChatRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Events published while a scan runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Progress { percent: u8, message: String },
    /// Total number of items discovered
    Found(usize),
}

/// Build an inventory entry from a message, `None` if it has nothing to download
pub fn classify_message(chat_ref: &ChatRef, message: &Message) -> Option<MediaItem> {
    let (name, size, kind) = match message.media.as_ref()? {
        MessageMedia::Photo { size } => {
            (format!("photo_{}.jpg", message.id), *size, MediaKind::Photo)
        }
        MessageMedia::Document { size, attributes } => {
            let name = attributes
                .iter()
                .find_map(DocumentAttribute::file_name)
                .map(str::to_string)
                .unwrap_or_else(|| format!("file_{}", message.id));
            let kind = MediaKind::from_file_name(&name);
            (name, *size, kind)
        }
        MessageMedia::Unsupported { kind } => {
            debug!(message_id = message.id, kind = %kind, "Skipping unsupported media");
            return None;
        }
    };

    Some(MediaItem {
        chat_ref: chat_ref.clone(),
        message_id: message.id,
        date: message.date,
        name,
        size,
        kind,
        selected: false,
    })
}

fn milestone(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    (60 + 35 * processed / total).min(95) as u8
}

/// Runs scans against an authenticated session
pub struct ScanJob {
    session: Arc<AuthSession>,
    config: ScanConfig,
}

impl ScanJob {
    pub fn new(session: Arc<AuthSession>, config: ScanConfig) -> Self {
        Self { session, config }
    }

    /// Start scanning `chat` in the background
    ///
    /// Fails immediately when the session is not authenticated, the
    /// connection is busy, or `chat` does not parse.
    pub fn start(&self, chat: &str, limit: usize) -> Result<ScanHandle> {
        self.session.require_authenticated()?;
        let chat_ref = ChatRef::parse(chat)?;
        let guard = self.session.begin_operation(OperationKind::Scan)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let session = Arc::clone(&self.session);
        let progress_every = self.config.progress_every.max(1);
        let stop_flag = Arc::clone(&stop);
        let task = tokio::spawn(async move {
            let _guard = guard;
            run_scan(&session, chat_ref, limit, progress_every, &stop_flag, &events_tx).await
        });

        Ok(ScanHandle {
            events: events_rx,
            stop,
            task,
        })
    }

    /// Scan with the configured message limit and wait for the result
    pub async fn scan(&self, chat: &str) -> Result<Vec<MediaItem>> {
        self.start(chat, self.config.message_limit)?.wait().await
    }
}

async fn run_scan(
    session: &AuthSession,
    chat_ref: ChatRef,
    limit: usize,
    progress_every: usize,
    stop: &AtomicBool,
    events: &mpsc::UnboundedSender<ScanEvent>,
) -> Result<Vec<MediaItem>> {
    let progress = |percent: u8, message: String| {
        let _ = events.send(ScanEvent::Progress { percent, message });
    };

    progress(10, format!("Connecting to {}", chat_ref));
    let messenger = session.messenger();
    let entity = messenger.resolve_entity(&chat_ref).await?;
    info!(chat = %chat_ref, entity = entity.id, title = %entity.title, limit, "Scanning chat");

    let messages = messenger.fetch_messages(&entity, limit).await?;
    let total = messages.len();
    progress(60, format!("Fetched {} messages", total));

    let mut items = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            info!(processed = i, found = items.len(), "Scan stopped");
            let _ = events.send(ScanEvent::Found(items.len()));
            return Ok(items);
        }

        if let Some(item) = classify_message(&chat_ref, message) {
            items.push(item);
        }

        let processed = i + 1;
        if processed % progress_every == 0 {
            progress(
                milestone(processed, total),
                format!("Processed {}/{} messages", processed, total),
            );
        }
    }

    info!(found = items.len(), messages = total, "Scan finished");
    progress(100, format!("Found {} media files", items.len()));
    let _ = events.send(ScanEvent::Found(items.len()));
    Ok(items)
}

/// Front-end side of a running scan
pub struct ScanHandle {
    events: mpsc::UnboundedReceiver<ScanEvent>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<Result<Vec<MediaItem>>>,
}

impl ScanHandle {
    /// Request a cooperative stop. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Wait for the final inventory
    pub async fn wait(self) -> Result<Vec<MediaItem>> {
        self.task.await?
    }
}
