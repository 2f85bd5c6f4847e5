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


//! Media inventory entities
//!
//! A [`MediaItem`] is one downloadable attachment discovered by a scan.
//! Its kind is derived once from the media variant and file name and is
//! never recomputed. The `selected` flag belongs to the selection layer.

use crate::scan::chat_ref::ChatRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "wmv"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "epub",
];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];

/// Classification of a discovered attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Bare photo media (no file name of its own)
    Photo,
    /// Document whose name has an image extension
    Image,
    Video,
    Document,
    Archive,
    /// Anything else, including names without an extension
    File,
}

impl MediaKind {
    pub const ALL: [MediaKind; 6] = [
        MediaKind::Photo,
        MediaKind::Image,
        MediaKind::Video,
        MediaKind::Document,
        MediaKind::Archive,
        MediaKind::File,
    ];

    /// Classify a document by the case-insensitive suffix of its file name
    ///
    /// Only the last extension counts, so `archive.TAR.GZ` is an archive
    /// because of `.gz`.
    pub fn from_file_name(name: &str) -> Self {
        // Whatever follows the last dot, so ".mkv" on its own still counts
        let extension = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return MediaKind::File,
        };
        let ext = extension.as_str();

        if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            MediaKind::Video
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            MediaKind::Document
        } else if ARCHIVE_EXTENSIONS.contains(&ext) {
            MediaKind::Archive
        } else {
            MediaKind::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Archive => "archive",
            MediaKind::File => "file",
        }
    }

    /// Whether a file name ends in one of the extensions of this kind
    pub fn matches_extension(&self, name: &str) -> bool {
        match self {
            MediaKind::Photo => false,
            kind => MediaKind::from_file_name(name) == *kind,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = crate::error::DownloaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                crate::error::DownloaderError::invalid_input(format!("Unknown media kind: {}", s))
            })
    }
}

/// One discovered attachment
///
/// `(chat_ref, message_id)` identifies an item uniquely within one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Chat the message was scanned from
    pub chat_ref: ChatRef,

    /// Message identifier within the chat
    pub message_id: i64,

    /// Message timestamp
    pub date: DateTime<Utc>,

    /// Display name (file name attribute or synthesized)
    pub name: String,

    /// Declared size in bytes, absent for some photo variants
    pub size: Option<u64>,

    pub kind: MediaKind,

    /// Owned by the selection layer; scan and download never write it
    #[serde(default)]
    pub selected: bool,
}

impl MediaItem {
    /// Identity of the item within one scan result
    pub fn key(&self) -> (String, i64) {
        (self.chat_ref.to_string(), self.message_id)
    }

    /// Size to trust for resume checks (known and non-zero)
    pub fn known_size(&self) -> Option<u64> {
        self.size.filter(|s| *s > 0)
    }
}
