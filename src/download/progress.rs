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


//! Job-wide throughput and ETA
//!
//! # Throughput
//! Cumulative network bytes of the whole job divided by wall-clock time since
//! the job started. This is a time-weighted average over the job, not a
//! sliding window.
//!
//! # Remaining bytes
//! For every item that has not finished:
//! - its size if known (declared, or the total reported by the transfer)
//! - otherwise the mean size of the items completed so far
//!
//! minus the bytes already received for it. Resumed items add no network
//! bytes but count as completed.
//!
//! # ETA
//! `remaining / throughput`, only when throughput is positive and at least
//! one item has completed. Otherwise the ETA is unknown (`None`).

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStatus {
    Pending,
    Active,
    Done,
    /// Failed or never started; no longer contributes to remaining bytes
    Dropped,
}

#[derive(Debug, Clone)]
struct ItemProgress {
    size: Option<u64>,
    received: u64,
    status: ItemStatus,
}

#[derive(Debug)]
struct State {
    items: Vec<ItemProgress>,
    network_bytes: u64,
    completed: usize,
    completed_bytes: u64,
}

/// Point-in-time view of a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Message whose transfer produced this snapshot
    pub message_id: i64,
    /// Bytes received for that message so far
    pub item_received: u64,
    /// Total reported for that message (0 if unknown)
    pub item_total: u64,
    /// Network bytes across the whole job
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    /// Bytes per second over the whole job
    pub throughput: f64,
    pub eta: Option<Duration>,
    pub items_completed: usize,
    pub items_total: usize,
}

impl ProgressSnapshot {
    /// Percentage of the current item, if its size is known
    pub fn item_percent(&self) -> Option<f64> {
        (self.item_total > 0)
            .then(|| (self.item_received as f64 / self.item_total as f64 * 100.0).min(100.0))
    }

    pub fn speed_string(&self) -> String {
        speed_string(self.throughput)
    }

    pub fn eta_string(&self) -> String {
        eta_string(self.eta)
    }
}

/// Turns per-chunk counters into job-wide figures
///
/// Items are addressed by their index in the job.
#[derive(Debug)]
pub struct ProgressAggregator {
    started: Instant,
    state: Mutex<State>,
}

impl ProgressAggregator {
    pub fn new(sizes: impl IntoIterator<Item = Option<u64>>) -> Self {
        Self::started_at(sizes, Instant::now())
    }

    pub fn started_at(sizes: impl IntoIterator<Item = Option<u64>>, started: Instant) -> Self {
        let items = sizes
            .into_iter()
            .map(|size| ItemProgress {
                size: size.filter(|s| *s > 0),
                received: 0,
                status: ItemStatus::Pending,
            })
            .collect();
        Self {
            started,
            state: Mutex::new(State {
                items,
                network_bytes: 0,
                completed: 0,
                completed_bytes: 0,
            }),
        }
    }

    fn with_item<R>(&self, index: usize, f: impl FnOnce(&mut State, usize) -> R) -> Option<R> {
        let mut state = self.state.lock().ok()?;
        if index >= state.items.len() {
            return None;
        }
        Some(f(&mut state, index))
    }

    pub fn item_started(&self, index: usize) {
        self.with_item(index, |s, i| s.items[i].status = ItemStatus::Active);
    }

    /// Record a chunk; `received` is cumulative for the item
    pub fn record(&self, index: usize, received: u64, total: u64) {
        self.with_item(index, |s, i| {
            let delta = received.saturating_sub(s.items[i].received);
            s.network_bytes += delta;
            let item = &mut s.items[i];
            item.received = received.max(item.received);
            if item.size.is_none() && total > 0 {
                item.size = Some(total);
            }
        });
    }

    /// Mark a transfer as finished with `bytes` on disk
    pub fn item_completed(&self, index: usize, bytes: u64) {
        self.with_item(index, |s, i| {
            if s.items[i].status == ItemStatus::Done {
                return;
            }
            s.items[i].status = ItemStatus::Done;
            s.completed += 1;
            s.completed_bytes += bytes;
        });
    }

    /// Resumed items are complete without any network transfer
    pub fn item_resumed(&self, index: usize, bytes: u64) {
        self.item_completed(index, bytes);
    }

    /// Failed or cancelled before start
    pub fn item_dropped(&self, index: usize) {
        self.with_item(index, |s, i| {
            if s.items[i].status != ItemStatus::Done {
                s.items[i].status = ItemStatus::Dropped;
            }
        });
    }

    pub fn snapshot(&self, message_id: i64, index: usize) -> ProgressSnapshot {
        self.snapshot_at(message_id, index, Instant::now())
    }

    pub fn snapshot_at(&self, message_id: i64, index: usize, now: Instant) -> ProgressSnapshot {
        let elapsed = now.saturating_duration_since(self.started);
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let (item_received, item_total) = state
            .items
            .get(index)
            .map(|item| (item.received, item.size.unwrap_or(0)))
            .unwrap_or((0, 0));

        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            state.network_bytes as f64 / secs
        } else {
            0.0
        };

        let eta = if throughput > 0.0 && state.completed > 0 {
            let mean = state.completed_bytes as f64 / state.completed as f64;
            let remaining: f64 = state
                .items
                .iter()
                .filter(|item| matches!(item.status, ItemStatus::Pending | ItemStatus::Active))
                .map(|item| {
                    let expected = item.size.map(|s| s as f64).unwrap_or(mean);
                    (expected - item.received as f64).max(0.0)
                })
                .sum();
            Duration::try_from_secs_f64(remaining / throughput).ok()
        } else {
            None
        };

        ProgressSnapshot {
            message_id,
            item_received,
            item_total,
            bytes_transferred: state.network_bytes,
            elapsed,
            throughput,
            eta,
            items_completed: state.completed,
            items_total: state.items.len(),
        }
    }
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable size in binary units, e.g. `1.5 MB`
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB", value)
}

/// Like [`format_size`], with a dash for unknown sizes
pub fn format_optional_size(bytes: Option<u64>) -> String {
    bytes.map(format_size).unwrap_or_else(|| "—".to_string())
}

/// e.g. `2.5 MB/s`
pub fn speed_string(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size(bytes_per_sec.max(0.0) as u64))
}

/// e.g. `5m 30s`; `unknown` when there is no estimate
pub fn eta_string(eta: Option<Duration>) -> String {
    let secs = match eta {
        Some(eta) => eta.as_secs(),
        None => return "unknown".to_string(),
    };

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
