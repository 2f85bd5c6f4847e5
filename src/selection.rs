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


//! Selection helpers for a scanned inventory
//!
//! This is the only code that writes [`MediaItem::selected`].

use crate::media::{MediaItem, MediaKind};

/// Items whose name contains `text` (case-insensitive) and, if given, of `kind`
pub fn filter<'a>(
    items: &'a [MediaItem],
    text: &str,
    kind: Option<MediaKind>,
) -> Vec<&'a MediaItem> {
    let needle = text.trim().to_lowercase();
    items
        .iter()
        .filter(|item| kind.map_or(true, |k| item.kind == k))
        .filter(|item| needle.is_empty() || item.name.to_lowercase().contains(&needle))
        .collect()
}

pub fn select_all(items: &mut [MediaItem]) {
    items.iter_mut().for_each(|item| item.selected = true);
}

pub fn select_none(items: &mut [MediaItem]) {
    items.iter_mut().for_each(|item| item.selected = false);
}

/// Mark exactly the items matching the filter
pub fn select_matching(items: &mut [MediaItem], text: &str, kind: Option<MediaKind>) -> usize {
    let needle = text.trim().to_lowercase();
    let mut count = 0;
    for item in items.iter_mut() {
        item.selected = kind.map_or(true, |k| item.kind == k)
            && (needle.is_empty() || item.name.to_lowercase().contains(&needle));
        if item.selected {
            count += 1;
        }
    }
    count
}

/// Selected items, cloned in inventory order
pub fn selected(items: &[MediaItem]) -> Vec<MediaItem> {
    items.iter().filter(|item| item.selected).cloned().collect()
}

pub fn selected_count(items: &[MediaItem]) -> usize {
    items.iter().filter(|item| item.selected).count()
}
