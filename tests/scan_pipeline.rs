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


//! Scan of a scripted chat from login to inventory

mod common;

use common::{document, photo, text, Script, ScriptedMessenger};
use tgdl_core::config::ScanConfig;
use tgdl_core::error::DownloaderError;
use tgdl_core::messenger::Message;
use tgdl_core::{selection, ChatRef, MediaKind, ScanEvent, ScanJob};

/// 10 photos, 15 videos, 10 documents, 5 archives and 5 text messages
fn mixed_chat() -> Vec<Message> {
    let mut messages = Vec::new();
    let mut id = 0;
    let mut next = || {
        id += 1;
        id
    };
    for _ in 0..10 {
        let id = next();
        messages.push(photo(id, 2048));
    }
    for (i, ext) in ["mp4", "mkv", "mov"].iter().cycle().take(15).enumerate() {
        let id = next();
        messages.push(document(id, &format!("clip_{}.{}", i, ext), 8192));
    }
    for i in 0..10 {
        let id = next();
        messages.push(document(id, &format!("report_{}.pdf", i), 4096));
    }
    for i in 0..5 {
        let id = next();
        messages.push(document(id, &format!("backup_{}.zip", i), 16384));
    }
    for _ in 0..5 {
        let id = next();
        messages.push(text(id));
    }
    messages
}

#[tokio::test]
async fn test_scan_classifies_mixed_chat() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = ScriptedMessenger::with_messages(mixed_chat());
    let session = common::logged_in(messenger, dir.path()).await;

    let job = ScanJob::new(session, ScanConfig::default());
    let mut handle = job.start("https://t.me/media_archive", 100).unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let items = handle.wait().await.unwrap();

    assert_eq!(items.len(), 40);
    let count = |kind: MediaKind| items.iter().filter(|i| i.kind == kind).count();
    assert_eq!(count(MediaKind::Photo), 10);
    assert_eq!(count(MediaKind::Video), 15);
    assert_eq!(count(MediaKind::Document), 10);
    assert_eq!(count(MediaKind::Archive), 5);

    for item in items.iter().filter(|i| i.kind == MediaKind::Video) {
        assert!(MediaKind::Video.matches_extension(&item.name), "{}", item.name);
    }
    assert!(items
        .iter()
        .all(|i| i.chat_ref == ChatRef::Username("media_archive".to_string())));
    assert!(items.iter().all(|i| !i.selected));

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Progress { percent, .. } => Some(*percent),
            ScanEvent::Found(_) => None,
        })
        .collect();
    assert_eq!(percents.first(), Some(&10));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(events.last(), Some(&ScanEvent::Found(40)));
}

#[tokio::test]
async fn test_scan_respects_message_limit() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = ScriptedMessenger::with_messages(mixed_chat());
    let session = common::logged_in(messenger, dir.path()).await;

    let job = ScanJob::new(session, ScanConfig::default());
    let items = job.start("@media_archive", 10).unwrap().wait().await.unwrap();

    // Newest ten: five text messages and five archives
    assert_eq!(items.len(), 5);
    assert!(items.iter().all(|i| i.kind == MediaKind::Archive));
}

#[tokio::test]
async fn test_scan_unknown_chat() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = ScriptedMessenger::with_messages(mixed_chat());
    let session = common::logged_in(messenger, dir.path()).await;

    let job = ScanJob::new(session, ScanConfig::default());
    let err = job.scan("@somebody_else").await.unwrap_err();
    assert!(matches!(err, DownloaderError::EntityNotFound(_)));
}

#[tokio::test]
async fn test_scan_rejects_bad_reference_before_starting() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = ScriptedMessenger::with_messages(mixed_chat());
    let session = common::logged_in(messenger, dir.path()).await;

    let job = ScanJob::new(session.clone(), ScanConfig::default());
    let err = job.start("   ", 100).err().unwrap();
    assert!(matches!(err, DownloaderError::InvalidChatReference(_)));

    // The connection was never claimed
    let items = job.scan("@media_archive").await.unwrap();
    assert_eq!(items.len(), 40);
}

#[tokio::test]
async fn test_scan_then_select_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = ScriptedMessenger::with_messages(mixed_chat());
    let session = common::logged_in(messenger, dir.path()).await;

    let job = ScanJob::new(session, ScanConfig::default());
    let mut items = job.scan(&common::CHAT_ID.to_string()).await.unwrap();

    let matched = selection::select_matching(&mut items, "", Some(MediaKind::Archive));
    assert_eq!(matched, 5);
    assert_eq!(selection::selected_count(&items), 5);
    assert!(selection::selected(&items)
        .iter()
        .all(|i| i.name.starts_with("backup_")));
}

#[tokio::test]
async fn test_stop_returns_partial_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = ScriptedMessenger::new(Script {
        messages: mixed_chat(),
        gated_history: true,
        ..Script::default()
    });
    let session = common::logged_in(messenger.clone(), dir.path()).await;

    let job = ScanJob::new(session.clone(), ScanConfig::default());
    let mut handle = job.start("@media_archive", 100).unwrap();
    common::wait_until(|| messenger.history_requests() == 1).await;
    handle.stop();
    handle.stop();
    messenger.release_history();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let items = handle.wait().await.unwrap();

    assert!(items.is_empty());
    assert_eq!(events.last(), Some(&ScanEvent::Found(0)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ScanEvent::Progress { percent: 100, .. })));

    // The connection is released for the next scan
    let job = ScanJob::new(session, ScanConfig::default());
    let scan = job.start("@media_archive", 10).unwrap();
    messenger.release_history();
    assert_eq!(scan.wait().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_demo_fixture_end_to_end() {
    use std::sync::Arc;
    use tgdl_core::auth::session::SessionStore;
    use tgdl_core::config::{AuthConfig, DownloadConfig};
    use tgdl_core::messenger::FixtureMessenger;
    use tgdl_core::{AuthEvent, AuthSession, DownloadManager};

    let fixture_path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/chat.json");
    let messenger = Arc::new(FixtureMessenger::load(fixture_path).await.unwrap());
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(AuthSession::new(
        messenger,
        common::credentials(),
        SessionStore::new(dir.path().join("user.session")),
        AuthConfig::default(),
    ));

    let mut handle = session.start().unwrap();
    while let Some(event) = handle.next_event().await {
        match event {
            AuthEvent::CodeNeeded(_) => handle.submit_code("12345").unwrap(),
            AuthEvent::PasswordNeeded => handle.submit_password("hunter2").unwrap(),
            AuthEvent::Success | AuthEvent::Error(_) => break,
        }
    }
    handle.wait().await.unwrap();

    let job = ScanJob::new(session.clone(), ScanConfig::default());
    let mut items = job.scan("https://t.me/media_dump").await.unwrap();
    let kinds: Vec<MediaKind> = items.iter().map(|i| i.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MediaKind::Archive,
            MediaKind::Document,
            MediaKind::Video,
            MediaKind::Photo
        ]
    );

    selection::select_all(&mut items);
    let dest = dir.path().join("out");
    let summary = DownloadManager::new(session, DownloadConfig::default())
        .download_all(selection::selected(&items), &dest, 2)
        .await
        .unwrap();
    assert_eq!(summary.ok, 4);
    assert_eq!(std::fs::read_to_string(dest.join("notes.txt")).unwrap(), "hello world");
    assert_eq!(std::fs::metadata(dest.join("holiday.MKV")).unwrap().len(), 1_048_576);
}
