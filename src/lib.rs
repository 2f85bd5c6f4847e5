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


//! Core of a chat media downloader
//!
//! - [`auth`] - login handshake and connection ownership
//! - [`scan`] - turn a chat's recent history into a media inventory
//! - [`selection`] - mark which inventory items to fetch
//! - [`download`] - bounded-concurrency download with resume and ETA
//!
//! The messaging service itself is reached through the [`messenger::Messenger`]
//! trait; [`messenger::FixtureMessenger`] is an offline implementation.

pub mod auth;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod media;
pub mod messenger;
pub mod scan;
pub mod selection;

/// Directory name used under the per-user data, config and log locations
pub const APP_DIR_NAME: &str = "tg-media-downloader";

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use auth::{AuthEvent, AuthHandle, AuthSession, AuthState};
pub use config::{AppConfig, Credentials};
pub use download::{DownloadEvent, DownloadHandle, DownloadManager, Summary};
pub use error::{DownloaderError, Result};
pub use media::{MediaItem, MediaKind};
pub use messenger::Messenger;
pub use scan::chat_ref::ChatRef;
pub use scan::{ScanEvent, ScanHandle, ScanJob};
