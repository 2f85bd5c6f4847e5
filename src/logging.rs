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


//! Tracing setup: console plus `app.log` in the per-user log directory
//!
//! The filter comes from `TGDL_LOG` (same syntax as `RUST_LOG`), default `info`.

use crate::error::{DownloaderError, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV_VAR: &str = "TGDL_LOG";
pub const LOG_FILE_NAME: &str = "app.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter directive; falls back to `TGDL_LOG`, then `info`
    pub filter: Option<String>,
    /// Directory for `app.log`; `None` disables the file layer
    pub log_dir: Option<PathBuf>,
    /// Also log to stdout
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: None,
            log_dir: Some(default_log_dir()),
            console: true,
        }
    }
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(crate::APP_DIR_NAME).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn build_filter(explicit: Option<&str>) -> EnvFilter {
    let directive = explicit
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV_VAR).ok())
        .unwrap_or_else(|| "info".to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Keep the returned guard alive for as long as file logging is needed;
/// dropping it flushes and stops the background writer.
pub fn init(options: LogOptions) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = options.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_file(false)
    });

    tracing_subscriber::registry()
        .with(build_filter(options.filter.as_deref()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| DownloaderError::internal(format!("logging already initialized: {}", e)))?;

    info!(
        version = crate::APP_VERSION,
        log_dir = ?options.log_dir,
        "TgDL core starting"
    );
    Ok(guard)
}
