// TgDL - Chat Media Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Session token persistence
//!
//! The token is an opaque blob produced by the messaging service after the
//! first successful login. Its presence at the per-user path is the only
//! signal that the interactive handshake may be skipped. It is written once,
//! removed only by an explicit logout, and never modified otherwise.

use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File name of the token inside the per-user data directory
pub const SESSION_FILE_NAME: &str = "user.session";

/// Opaque serialized session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(Vec<u8>);

impl SessionToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Never print the blob itself
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({} bytes)", self.0.len())
    }
}

/// Default per-user location of the session token
pub fn default_session_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(crate::APP_DIR_NAME).join(SESSION_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(SESSION_FILE_NAME))
}

/// Reads and writes the session token file
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the token, `None` if absent or empty
    pub async fn load(&self) -> Result<Option<SessionToken>> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => {
                debug!(path = %self.path.display(), "Loaded session token");
                Ok(Some(SessionToken::new(bytes)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the token, replacing the file atomically
    pub async fn save(&self, token: &SessionToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("session.tmp");
        fs::write(&tmp, token.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), "Saved session token");
        Ok(())
    }

    /// Remove the token (explicit logout). Missing file is not an error.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed session token");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
