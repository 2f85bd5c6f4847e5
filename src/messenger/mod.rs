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


//! Messaging service collaborator
//!
//! The wire protocol (connection setup, encryption, RPC framing) lives outside
//! this crate. The core consumes it through the [`Messenger`] trait and the
//! plain message types below.
//!
//! # Concurrency
//!
//! Implementations must be `Send + Sync`. When a transport cannot serve several
//! logical requests at once it reports so through
//! [`Messenger::supports_concurrent_requests`] and should implement
//! [`Messenger::open_secondary`], which the download pool uses to open one
//! independent connection per extra worker.

pub mod fixture;

pub use fixture::FixtureMessenger;

use crate::auth::session::SessionToken;
use crate::error::{DownloaderError, Result};
use crate::scan::chat_ref::ChatRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Opaque resolved reference to a chat, channel or user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    /// Collaborator-defined identifier
    pub id: i64,
    /// Display title, for logs only
    pub title: String,
}

/// Outcome of submitting a login code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInOutcome {
    Authorized,
    /// The account has a second factor; a password must follow
    PasswordRequired,
}

/// Attribute attached to a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentAttribute {
    Filename { file_name: String },
    Video { duration_secs: u32 },
    Audio { duration_secs: u32 },
    ImageSize { width: u32, height: u32 },
    Animated,
}

impl DocumentAttribute {
    pub fn file_name(&self) -> Option<&str> {
        match self {
            DocumentAttribute::Filename { file_name } if !file_name.is_empty() => Some(file_name),
            _ => None,
        }
    }
}

/// Media carried by a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageMedia {
    /// Bare photo; some variants do not announce a size
    Photo {
        #[serde(default)]
        size: Option<u64>,
    },
    /// File-like attachment
    Document {
        #[serde(default)]
        size: Option<u64>,
        #[serde(default)]
        attributes: Vec<DocumentAttribute>,
    },
    /// Web previews, polls, locations and the like
    Unsupported { kind: String },
}

/// One message as returned by the collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub media: Option<MessageMedia>,
}

/// Capability contract of the messaging service
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Open the transport, restoring a previously exported session if given
    async fn connect(&self, session: Option<&SessionToken>) -> Result<()>;

    /// Whether the connected session is already logged in
    async fn is_authorized(&self) -> Result<bool>;

    /// Ask the service to send a one-time login code to `phone`
    async fn request_code(&self, phone: &str) -> Result<()>;

    async fn sign_in(&self, phone: &str, code: &str) -> Result<SignInOutcome>;

    /// Complete a login that reported [`SignInOutcome::PasswordRequired`]
    async fn check_password(&self, password: &str) -> Result<()>;

    /// Serialize the authorized session for reuse on a later run
    async fn export_session(&self) -> Result<SessionToken>;

    /// Fails with [`DownloaderError::EntityNotFound`] when nothing matches
    async fn resolve_entity(&self, reference: &ChatRef) -> Result<EntityHandle>;

    /// Up to `limit` most recent messages, newest first
    async fn fetch_messages(&self, entity: &EntityHandle, limit: usize) -> Result<Vec<Message>>;

    async fn fetch_message(&self, entity: &EntityHandle, message_id: i64) -> Result<Option<Message>>;

    /// Stream the media of `message` into `dest`, calling `on_progress` per chunk
    async fn download_media(
        &self,
        message: &Message,
        dest: &Path,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn supports_concurrent_requests(&self) -> bool {
        true
    }

    /// Open an independent, already authorized connection to the same account
    async fn open_secondary(&self) -> Result<Arc<dyn Messenger>> {
        Err(DownloaderError::NotSupported(
            "secondary connections".to_string(),
        ))
    }
}
