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


//! Application configuration
//!
//! Configuration is an explicit value handed to each component at
//! construction. Persisting it is the job of a [`SettingsStore`], which the
//! front end injects; [`JsonSettingsStore`] is the file-backed default.

use crate::auth::session::default_session_path;
use crate::error::{DownloaderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default number of simultaneous transfers
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default number of recent messages inspected by a scan
pub const DEFAULT_MESSAGE_LIMIT: usize = 100;

/// API credentials and the account phone number
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
}

impl Credentials {
    pub fn new(api_id: i32, api_hash: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            phone: phone.into(),
        }
    }

    /// Phone number with all but the last three digits hidden, for logs
    pub fn masked_phone(&self) -> String {
        let split = self
            .phone
            .char_indices()
            .rev()
            .nth(2)
            .map_or(0, |(index, _)| index);
        let hidden: String = self.phone[..split]
            .chars()
            .map(|c| if c.is_numeric() { '*' } else { c })
            .collect();
        format!("{}{}", hidden, &self.phone[split..])
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("phone", &self.masked_phone())
            .finish()
    }
}

/// Login handshake settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    /// Bound on each wait for a code or password; `None` waits indefinitely
    #[serde(default)]
    pub prompt_timeout_secs: Option<u64>,
}

impl AuthConfig {
    pub fn prompt_timeout(&self) -> Option<Duration> {
        self.prompt_timeout_secs.map(Duration::from_secs)
    }
}

/// Scan settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    /// Most recent messages to inspect
    pub message_limit: usize,
    /// Emit a progress milestone every this many messages
    pub progress_every: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            progress_every: 25,
        }
    }
}

/// Download settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Maximum concurrent transfers
    pub concurrency: usize,
    /// Output directory for downloaded files
    pub destination: PathBuf,
    /// Minimum interval between progress events of one item
    pub progress_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            destination: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            progress_interval_ms: 200,
        }
    }
}

impl DownloadConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub credentials: Credentials,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    /// Override for the session token location
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    /// Start the login handshake on launch when credentials are present
    #[serde(default = "default_autologin")]
    pub autologin: bool,
}

fn default_autologin() -> bool {
    true
}

impl AppConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            auth: AuthConfig::default(),
            scan: ScanConfig::default(),
            download: DownloadConfig::default(),
            session_path: None,
            autologin: true,
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_path.clone().unwrap_or_else(default_session_path)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.credentials;
        if c.api_id <= 0 {
            return Err(DownloaderError::InvalidConfiguration(
                "api id must be a positive integer".to_string(),
            ));
        }
        if c.api_hash.trim().is_empty() {
            return Err(DownloaderError::InvalidConfiguration(
                "api hash is empty".to_string(),
            ));
        }
        if c.phone.trim().is_empty() {
            return Err(DownloaderError::InvalidConfiguration(
                "phone number is empty".to_string(),
            ));
        }
        if self.download.concurrency == 0 {
            return Err(DownloaderError::InvalidConfiguration(
                "download concurrency must be at least 1".to_string(),
            ));
        }
        if self.scan.message_limit == 0 {
            return Err(DownloaderError::InvalidConfiguration(
                "message limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persistence adapter for [`AppConfig`]
pub trait SettingsStore: Send + Sync {
    /// `None` when nothing has been saved yet
    fn load(&self) -> Result<Option<AppConfig>>;
    fn save(&self, config: &AppConfig) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores settings as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the per-user config location
    pub fn default_location() -> Self {
        let path = dirs::config_dir()
            .map(|d| d.join(crate::APP_DIR_NAME).join("settings.json"))
            .unwrap_or_else(|| PathBuf::from("settings.json"));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Option<AppConfig>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: AppConfig = serde_json::from_str(&json)?;
        debug!(path = %self.path.display(), "Loaded settings");
        Ok(Some(config))
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), "Saved settings");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
