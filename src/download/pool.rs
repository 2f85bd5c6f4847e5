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


//! Connections used by the download workers
//!
//! A transport that can multiplex requests is shared by every worker.
//! Otherwise each extra worker gets its own secondary connection, which is
//! closed when the job ends. The primary connection belongs to the session
//! and is never closed here.

use crate::error::{DownloaderError, Result};
use crate::messenger::Messenger;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct TransferPool {
    lanes: Vec<Arc<dyn Messenger>>,
    secondaries: Vec<Arc<dyn Messenger>>,
}

impl TransferPool {
    /// Build one lane per worker, `concurrency` at most
    ///
    /// If the transport cannot open secondary connections the pool shrinks
    /// to the lanes it has, so the worker count may end up below
    /// `concurrency`.
    pub async fn open(primary: Arc<dyn Messenger>, concurrency: usize) -> Result<Self> {
        let concurrency = concurrency.max(1);

        if primary.supports_concurrent_requests() {
            debug!(concurrency, "Sharing the primary connection");
            return Ok(Self {
                lanes: vec![primary; concurrency],
                secondaries: Vec::new(),
            });
        }

        let mut pool = Self {
            lanes: vec![Arc::clone(&primary)],
            secondaries: Vec::new(),
        };
        for _ in 1..concurrency {
            match primary.open_secondary().await {
                Ok(conn) => {
                    pool.lanes.push(Arc::clone(&conn));
                    pool.secondaries.push(conn);
                }
                Err(DownloaderError::NotSupported(what)) => {
                    warn!(what = %what, lanes = pool.lanes.len(), "Cannot open more connections");
                    break;
                }
                Err(e) => {
                    pool.close().await;
                    return Err(e);
                }
            }
        }

        info!(lanes = pool.lanes.len(), "Opened transfer connections");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn lane(&self, index: usize) -> Arc<dyn Messenger> {
        Arc::clone(&self.lanes[index % self.lanes.len()])
    }

    /// Disconnect the secondary connections
    pub async fn close(self) {
        for conn in self.secondaries {
            if let Err(e) = conn.disconnect().await {
                warn!(error = %e, "Failed to close secondary connection");
            }
        }
    }
}
