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


//! Destination file naming
//!
//! # Rules
//! - Keep only alphanumerics, `.`, `_`, `-` and space; drop everything else
//! - A name that ends up empty or made only of dots becomes `file_<msg_id>`
//! - Names are shortened, keeping the extension, so that `<name>.part` still
//!   fits in a 255-byte path component
//! - Two items of one job with the same name get `_<msg_id>` before the extension
//!
//! Names are a pure function of the inventory, so a restarted job maps every
//! item to the same path and the resume check finds earlier files.

use crate::media::MediaItem;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MAX_COMPONENT_LENGTH: usize = 255;

/// Suffix of in-progress transfers
pub const PART_EXTENSION: &str = "part";

/// Longest final name whose `.part` sibling is still a valid component
pub const MAX_NAME_LENGTH: usize = MAX_COMPONENT_LENGTH - PART_EXTENSION.len() - 1;

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ')
}

/// Drop every character outside the allow-list
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name.chars().filter(|c| is_allowed(*c)).collect();
    kept.trim().to_string()
}

/// Sanitized name for an item, with the `file_<msg_id>` fallback
pub fn safe_name(item: &MediaItem) -> String {
    let name = sanitize_filename(&item.name);
    if name.chars().all(|c| c == '.') {
        return format!("file_{}", item.message_id);
    }
    truncate_component(&name, MAX_NAME_LENGTH)
}

/// Shorten to `max_bytes`, keeping the extension when there is one
pub fn truncate_component(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    let room = max_bytes.saturating_sub(ext.len());
    let mut index = room.min(stem.len());
    while index > 0 && !stem.is_char_boundary(index) {
        index -= 1;
    }
    format!("{}{}", &stem[..index], ext)
}

/// `("clip", ".mp4")`; the extension part is empty when there is none
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Insert `suffix` before the extension, shortening the stem to stay within
/// [`MAX_NAME_LENGTH`]
fn with_suffix(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(name);
    let room = MAX_NAME_LENGTH.saturating_sub(suffix.len() + ext.len());
    let mut index = room.min(stem.len());
    while index > 0 && !stem.is_char_boundary(index) {
        index -= 1;
    }
    format!("{}{}{}", &stem[..index], suffix, ext)
}

/// Hands out collision-free file names within one download job
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, item: &MediaItem) -> String {
        let name = safe_name(item);
        if self.taken.insert(name.to_lowercase()) {
            return name;
        }

        let mut candidate = with_suffix(&name, &format!("_{}", item.message_id));
        let mut counter = 1;
        while !self.taken.insert(candidate.to_lowercase()) {
            candidate = with_suffix(&name, &format!("_{}_{}", item.message_id, counter));
            counter += 1;
        }
        candidate
    }
}

/// Temporary sibling used while a transfer is running
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PART_EXTENSION);
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::scan::chat_ref::ChatRef;
    use chrono::Utc;

    fn item(id: i64, name: &str) -> MediaItem {
        MediaItem {
            chat_ref: ChatRef::Id(1),
            message_id: id,
            date: Utc::now(),
            name: name.to_string(),
            size: None,
            kind: MediaKind::File,
            selected: true,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my file (1).mp4"), "my file 1.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("a/b\\c:d*e?.txt"), "abcde.txt");
        assert_eq!(sanitize_filename("Привет_мир.pdf"), "Привет_мир.pdf");
    }

    #[test]
    fn test_fallback_names() {
        assert_eq!(safe_name(&item(9, "???")), "file_9");
        assert_eq!(safe_name(&item(10, "..")), "file_10");
        assert_eq!(safe_name(&item(11, "/.")), "file_11");
        assert_eq!(safe_name(&item(12, "ok.zip")), "ok.zip");
    }

    #[test]
    fn test_collisions_get_message_id() {
        let mut names = NameAllocator::new();
        assert_eq!(names.allocate(&item(1, "clip.mp4")), "clip.mp4");
        assert_eq!(names.allocate(&item(2, "clip.mp4")), "clip_2.mp4");
        assert_eq!(names.allocate(&item(3, "CLIP.mp4")), "CLIP_3.mp4");
        assert_eq!(names.allocate(&item(4, "notes")), "notes");
        assert_eq!(names.allocate(&item(5, "notes")), "notes_5");
    }

    #[test]
    fn test_truncate_keeps_extension() {
        let long = format!("{}.mp4", "x".repeat(300));
        let short = truncate_component(&long, 255);
        assert_eq!(short.len(), 255);
        assert!(short.ends_with(".mp4"));
    }

    #[test]
    fn test_long_names_leave_room_for_part_suffix() {
        let long = format!("{}.mp4", "x".repeat(300));
        let name = safe_name(&item(1, &long));
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.ends_with(".mp4"));
        let part = part_path(Path::new(&name));
        assert_eq!(part.as_os_str().len(), 255);

        let mut names = NameAllocator::new();
        names.allocate(&item(1, &long));
        let second = names.allocate(&item(2, &long));
        assert_eq!(second.len(), MAX_NAME_LENGTH);
        assert!(second.ends_with("_2.mp4"));
    }

    #[test]
    fn test_part_path() {
        let p = part_path(Path::new("/tmp/out/clip.mp4"));
        assert_eq!(p, PathBuf::from("/tmp/out/clip.mp4.part"));
    }
}
