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


//! Download of selected media items
//!
//! - `manager` - job orchestration, worker pool, resume and cancellation
//! - `progress` - job-wide throughput and ETA
//! - `pool` - connections shared by or dedicated to workers
//! - `paths` - destination file naming

pub mod manager;
pub mod paths;
pub mod pool;
pub mod progress;

// Re-export commonly used types
pub use manager::{DownloadEvent, DownloadHandle, DownloadManager, StopSignal, Summary};
pub use progress::{format_size, ProgressAggregator, ProgressSnapshot};
