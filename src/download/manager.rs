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


//! Bounded-concurrency download of selected media
//!
//! # Job flow
//! 1. Create the destination directory and assign every item a file name
//! 2. Resolve each distinct chat once (failure aborts the job)
//! 3. Open one transfer lane per worker (see [`TransferPool`])
//! 4. Workers pull items from a shared FIFO queue until it is empty or a stop
//!    was requested
//!
//! # Per item
//! - Resume: an existing file whose size equals the known, non-zero size is
//!   counted `ok` without any transfer
//! - Otherwise the message is fetched again by id and its media streamed to
//!   `<name>.part`, which is renamed on success and deleted on failure
//! - A known size that differs from the written size fails the item
//!
//! Item failures are tallied and never stop the job. The stop flag is only
//! read before claiming the next item, so transfers in flight always finish
//! or fail on their own.

use crate::auth::{AuthSession, OperationGuard, OperationKind};
use crate::config::DownloadConfig;
use crate::download::paths::{part_path, NameAllocator};
use crate::download::pool::TransferPool;
use crate::download::progress::{ProgressAggregator, ProgressSnapshot};
use crate::error::{DownloaderError, Result};
use crate::media::MediaItem;
use crate::messenger::{EntityHandle, Message, Messenger};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome counts of one download job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Finished items, resumed ones included
    pub ok: usize,
    pub fail: usize,
    /// Items satisfied by an existing file
    pub resumed: usize,
    /// Items never claimed because of a stop request
    pub not_started: usize,
    pub cancelled: bool,
}

impl Summary {
    /// Items that were claimed by a worker
    pub fn attempted(&self) -> usize {
        self.ok + self.fail
    }
}

/// Events published while a job runs
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Started { total: usize },
    ItemStarted { message_id: i64, name: String },
    Progress(ProgressSnapshot),
    ItemResumed { message_id: i64, path: PathBuf },
    ItemCompleted { message_id: i64, path: PathBuf, bytes: u64 },
    ItemFailed { message_id: i64, error: String },
    Finished(Summary),
}

/// Cloneable stop request for a running job
#[derive(Debug, Clone)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Idempotent
    pub fn stop(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            info!("Download stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Front-end side of a running job
pub struct DownloadHandle {
    id: Uuid,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    stop: StopSignal,
    task: JoinHandle<Result<Summary>>,
}

impl DownloadHandle {
    /// Identifier of the job, as it appears in the logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop claiming new items. Idempotent.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    pub async fn wait(self) -> Result<Summary> {
        self.task.await?
    }
}

/// Starts download jobs on an authenticated session
pub struct DownloadManager {
    session: Arc<AuthSession>,
    config: DownloadConfig,
}

impl DownloadManager {
    pub fn new(session: Arc<AuthSession>, config: DownloadConfig) -> Self {
        Self { session, config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Start downloading `items` into `dest` with at most `concurrency`
    /// simultaneous transfers
    pub fn start(
        &self,
        items: Vec<MediaItem>,
        dest: impl AsRef<Path>,
        concurrency: usize,
    ) -> Result<DownloadHandle> {
        if concurrency == 0 {
            return Err(DownloaderError::invalid_input(
                "concurrency must be at least 1",
            ));
        }
        self.session.require_authenticated()?;
        let guard = self.session.begin_operation(OperationKind::Download)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stop = StopSignal(Arc::new(AtomicBool::new(false)));
        let id = Uuid::new_v4();

        let job = Job {
            messenger: self.session.messenger(),
            items,
            dest: dest.as_ref().to_path_buf(),
            concurrency,
            progress_interval: self.config.progress_interval(),
            stop: stop.clone(),
            events: events_tx,
        };
        let task = tokio::spawn(job.run(guard).instrument(info_span!("download", job = %id)));

        Ok(DownloadHandle {
            id,
            events: events_rx,
            stop,
            task,
        })
    }

    /// Start with the configured destination and concurrency
    pub fn start_default(&self, items: Vec<MediaItem>) -> Result<DownloadHandle> {
        self.start(items, &self.config.destination, self.config.concurrency)
    }

    /// Download and wait for the summary
    pub async fn download_all(
        &self,
        items: Vec<MediaItem>,
        dest: impl AsRef<Path>,
        concurrency: usize,
    ) -> Result<Summary> {
        self.start(items, dest, concurrency)?.wait().await
    }
}

/// One queued item with its assigned destination
#[derive(Debug)]
struct QueuedItem {
    index: usize,
    item: MediaItem,
    path: PathBuf,
}

struct Job {
    messenger: Arc<dyn Messenger>,
    items: Vec<MediaItem>,
    dest: PathBuf,
    concurrency: usize,
    progress_interval: Duration,
    stop: StopSignal,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

/// State shared by the workers of one job
struct Shared {
    queue: StdMutex<VecDeque<QueuedItem>>,
    entities: HashMap<String, EntityHandle>,
    aggregator: ProgressAggregator,
    stop: StopSignal,
    events: mpsc::UnboundedSender<DownloadEvent>,
    progress_interval: Duration,
    ok: AtomicUsize,
    fail: AtomicUsize,
    resumed: AtomicUsize,
}

impl Shared {
    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }

    /// Next item, or `None` when stopped or drained
    fn claim(&self) -> Option<QueuedItem> {
        if self.stop.is_stopped() {
            return None;
        }
        self.queue.lock().ok()?.pop_front()
    }
}

impl Job {
    async fn run(self, guard: OperationGuard) -> Result<Summary> {
        let _guard = guard;
        let events = self.events.clone();
        let result = self.execute().await;
        match &result {
            Ok(summary) => {
                let _ = events.send(DownloadEvent::Finished(*summary));
            }
            Err(e) => error!(error = %e, "Download job aborted"),
        }
        result
    }

    async fn execute(self) -> Result<Summary> {
        tokio::fs::create_dir_all(&self.dest).await?;

        let mut names = NameAllocator::new();
        let queue: VecDeque<QueuedItem> = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| QueuedItem {
                index,
                item: item.clone(),
                path: self.dest.join(names.allocate(item)),
            })
            .collect();

        let mut entities = HashMap::new();
        for item in &self.items {
            let key = item.chat_ref.to_string();
            if !entities.contains_key(&key) {
                let entity = self.messenger.resolve_entity(&item.chat_ref).await?;
                entities.insert(key, entity);
            }
        }

        let total = queue.len();
        let lanes = self.concurrency.min(total).max(1);
        let pool = TransferPool::open(Arc::clone(&self.messenger), lanes).await?;

        info!(
            total,
            workers = pool.len(),
            dest = %self.dest.display(),
            "Starting download"
        );
        let _ = self.events.send(DownloadEvent::Started { total });

        let shared = Arc::new(Shared {
            queue: StdMutex::new(queue),
            entities,
            aggregator: ProgressAggregator::new(self.items.iter().map(MediaItem::known_size)),
            stop: self.stop.clone(),
            events: self.events.clone(),
            progress_interval: self.progress_interval,
            ok: AtomicUsize::new(0),
            fail: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
        });

        let mut workers = JoinSet::new();
        for lane in 0..pool.len() {
            let shared = Arc::clone(&shared);
            let messenger = pool.lane(lane);
            workers.spawn(
                async move {
                    while let Some(queued) = shared.claim() {
                        process_item(&shared, messenger.as_ref(), queued).await;
                    }
                }
                .in_current_span(),
            );
        }

        let mut worker_error = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                worker_error = Some(DownloaderError::from(e));
            }
        }
        pool.close().await;
        if let Some(e) = worker_error {
            return Err(e);
        }

        let leftover: Vec<QueuedItem> = shared
            .queue
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default();
        for queued in &leftover {
            shared.aggregator.item_dropped(queued.index);
        }

        let summary = Summary {
            ok: shared.ok.load(Ordering::SeqCst),
            fail: shared.fail.load(Ordering::SeqCst),
            resumed: shared.resumed.load(Ordering::SeqCst),
            not_started: leftover.len(),
            cancelled: self.stop.is_stopped(),
        };
        info!(
            ok = summary.ok,
            fail = summary.fail,
            resumed = summary.resumed,
            not_started = summary.not_started,
            cancelled = summary.cancelled,
            "Download finished"
        );
        Ok(summary)
    }
}

async fn process_item(shared: &Shared, messenger: &dyn Messenger, queued: QueuedItem) {
    let QueuedItem { index, item, path } = queued;
    let message_id = item.message_id;

    if let Some(bytes) = existing_complete_file(&path, &item).await {
        debug!(message_id, path = %path.display(), "Already downloaded, skipping");
        shared.resumed.fetch_add(1, Ordering::SeqCst);
        shared.ok.fetch_add(1, Ordering::SeqCst);
        shared.aggregator.item_resumed(index, bytes);
        shared.emit(DownloadEvent::ItemResumed { message_id, path });
        return;
    }

    shared.aggregator.item_started(index);
    shared.emit(DownloadEvent::ItemStarted {
        message_id,
        name: item.name.clone(),
    });

    match transfer(shared, messenger, index, &item, &path).await {
        Ok(bytes) => {
            shared.ok.fetch_add(1, Ordering::SeqCst);
            shared.aggregator.item_completed(index, bytes);
            shared.emit(DownloadEvent::Progress(
                shared.aggregator.snapshot(message_id, index),
            ));
            debug!(message_id, bytes, path = %path.display(), "Item downloaded");
            shared.emit(DownloadEvent::ItemCompleted {
                message_id,
                path,
                bytes,
            });
        }
        Err(e) => {
            let e = as_item_error(e, message_id);
            shared.fail.fetch_add(1, Ordering::SeqCst);
            shared.aggregator.item_dropped(index);
            warn!(message_id, error = %e, "Item failed");
            shared.emit(DownloadEvent::ItemFailed {
                message_id,
                error: e.to_string(),
            });
        }
    }
}

/// Size of the existing destination file if it already matches the item
async fn existing_complete_file(path: &Path, item: &MediaItem) -> Option<u64> {
    let expected = item.known_size()?;
    let meta = tokio::fs::metadata(path).await.ok()?;
    (meta.is_file() && meta.len() == expected).then_some(expected)
}

async fn transfer(
    shared: &Shared,
    messenger: &dyn Messenger,
    index: usize,
    item: &MediaItem,
    path: &Path,
) -> Result<u64> {
    let message_id = item.message_id;
    let entity = shared
        .entities
        .get(&item.chat_ref.to_string())
        .ok_or_else(|| DownloaderError::internal("chat was not resolved"))?;

    let message = messenger
        .fetch_message(entity, message_id)
        .await?
        .filter(|m| m.media.is_some())
        .ok_or(DownloaderError::MediaUnavailable(message_id))?;

    let part = part_path(path);
    let last_emit: StdMutex<Option<Instant>> = StdMutex::new(None);
    let interval = shared.progress_interval;
    let on_progress = |received: u64, total: u64| {
        shared.aggregator.record(index, received, total);
        let is_final = total > 0 && received >= total;
        let due = match last_emit.lock() {
            Ok(mut last) => {
                let now = Instant::now();
                let due = is_final || last.map_or(true, |t| now.duration_since(t) >= interval);
                if due {
                    *last = Some(now);
                }
                due
            }
            Err(_) => is_final,
        };
        if due {
            shared.emit(DownloadEvent::Progress(
                shared.aggregator.snapshot(message_id, index),
            ));
        }
    };

    let result = write_part(messenger, &message, &part, &on_progress, item.known_size()).await;
    match result {
        Ok(written) => {
            tokio::fs::rename(&part, path).await?;
            Ok(written)
        }
        Err(e) => {
            discard_part(&part).await;
            Err(e)
        }
    }
}

async fn write_part(
    messenger: &dyn Messenger,
    message: &Message,
    part: &Path,
    on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    expected: Option<u64>,
) -> Result<u64> {
    messenger.download_media(message, part, on_progress).await?;
    let written = tokio::fs::metadata(part).await?.len();
    if let Some(expected) = expected {
        if written != expected {
            return Err(DownloaderError::FileSizeMismatch {
                expected,
                actual: written,
            });
        }
    }
    Ok(written)
}

async fn discard_part(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!(path = %part.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %part.display(), error = %e, "Could not remove partial file"),
    }
}

fn as_item_error(e: DownloaderError, message_id: i64) -> DownloaderError {
    if e.is_item_error() {
        e
    } else {
        DownloaderError::item(message_id, e.to_string())
    }
}
