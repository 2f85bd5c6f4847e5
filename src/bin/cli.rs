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


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tgdl_core::auth::session::{default_session_path, SessionStore};
use tgdl_core::config::{JsonSettingsStore, SettingsStore};
use tgdl_core::download::progress::{format_optional_size, format_size};
use tgdl_core::logging::{self, LogOptions};
use tgdl_core::messenger::FixtureMessenger;
use tgdl_core::{
    selection, AppConfig, AuthEvent, AuthSession, AuthState, Credentials, DownloadEvent,
    DownloadManager, MediaItem, MediaKind, ScanEvent, ScanJob,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser)]
#[command(name = "tgdl-cli")]
#[command(about = "TgDL CLI - scan and download chat media from a fixture", long_about = None)]
struct Cli {
    /// Fixture file describing the account and its chats
    #[arg(long, global = true, default_value = "chat.json")]
    fixture: PathBuf,

    /// Settings file (defaults to the per-user config location)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[arg(long, global = true)]
    api_id: Option<i32>,

    #[arg(long, global = true)]
    api_hash: Option<String>,

    #[arg(long, global = true)]
    phone: Option<String>,

    /// Persist the effective settings
    #[arg(long, global = true)]
    save_settings: bool,

    /// Also print logs to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, asking for the code and password when needed
    Login,
    /// List the media of a chat
    Scan {
        /// Link, @handle or numeric id
        chat: String,
        /// Most recent messages to inspect
        #[arg(short, long)]
        limit: Option<usize>,
        /// Write the inventory as JSON
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Download items of a saved inventory
    Download {
        #[arg(short, long)]
        inventory: PathBuf,
        #[arg(short, long)]
        dest: Option<PathBuf>,
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Only items of this kind (photo, image, video, document, archive, file)
        #[arg(short, long)]
        kind: Option<MediaKind>,
        /// Only items whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Delete the stored session
    Logout,
    /// Delete saved settings and the stored session
    ClearSettings,
}

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init(LogOptions {
        console: cli.verbose,
        ..LogOptions::default()
    })?;

    let store: Box<dyn SettingsStore> = match &cli.settings {
        Some(path) => Box::new(JsonSettingsStore::new(path)),
        None => Box::new(JsonSettingsStore::default_location()),
    };
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    // Must work even when the saved settings are incomplete
    if let Commands::ClearSettings = cli.command {
        return clear_settings(store.as_ref()).await;
    }

    let config = effective_config(&cli, store.as_ref())?;
    if cli.save_settings {
        store.save(&config)?;
    }

    let messenger = Arc::new(
        FixtureMessenger::load(&cli.fixture)
            .await
            .with_context(|| format!("loading fixture {}", cli.fixture.display()))?,
    );
    let session = Arc::new(AuthSession::from_config(messenger, &config));

    match cli.command {
        Commands::Login => {
            login(&session, &mut input).await?;
            println!("Logged in");
        }
        Commands::Scan { chat, limit, out } => {
            login(&session, &mut input).await?;
            let limit = limit.unwrap_or(config.scan.message_limit);
            let items = scan(&session, &config, &chat, limit).await?;
            print_inventory(&items);
            if let Some(out) = out {
                let json = serde_json::to_string_pretty(&items)?;
                std::fs::write(&out, json)
                    .with_context(|| format!("writing {}", out.display()))?;
                println!("Inventory written to {}", out.display());
            }
        }
        Commands::Download {
            inventory,
            dest,
            concurrency,
            kind,
            filter,
        } => {
            let mut items = read_inventory(&inventory)?;
            if kind.is_some() || filter.is_some() {
                selection::select_matching(&mut items, filter.as_deref().unwrap_or(""), kind);
            } else {
                selection::select_all(&mut items);
            }
            let chosen = selection::selected(&items);
            if chosen.is_empty() {
                bail!("nothing selected");
            }

            login(&session, &mut input).await?;
            let dest = dest.unwrap_or_else(|| config.download.destination.clone());
            let concurrency = concurrency.unwrap_or(config.download.concurrency);
            download(&session, &config, chosen, &dest, concurrency).await?;
        }
        Commands::Logout => {
            session.logout().await?;
            println!("Logged out");
        }
        Commands::ClearSettings => clear_settings(store.as_ref()).await?,
    }

    Ok(())
}

async fn clear_settings(store: &dyn SettingsStore) -> anyhow::Result<()> {
    let config = store.load()?;
    store.clear()?;
    let session_path = config
        .map(|c| c.session_path())
        .unwrap_or_else(default_session_path);
    SessionStore::new(session_path).clear().await?;
    println!("Settings and session removed");
    Ok(())
}

fn effective_config(cli: &Cli, store: &dyn SettingsStore) -> anyhow::Result<AppConfig> {
    let mut config = store
        .load()?
        .unwrap_or_else(|| AppConfig::new(Credentials::default()));
    if let Some(id) = cli.api_id {
        config.credentials.api_id = id;
    }
    if let Some(hash) = &cli.api_hash {
        config.credentials.api_hash = hash.clone();
    }
    if let Some(phone) = &cli.phone {
        config.credentials.phone = phone.clone();
    }
    config
        .validate()
        .context("incomplete settings; pass --api-id, --api-hash and --phone")?;
    Ok(config)
}

async fn prompt(input: &mut Input, text: &str) -> anyhow::Result<String> {
    print!("{}", text);
    std::io::stdout().flush()?;
    match input.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => bail!("input closed"),
    }
}

async fn login(session: &Arc<AuthSession>, input: &mut Input) -> anyhow::Result<()> {
    if session.state() == AuthState::Authenticated {
        return Ok(());
    }

    let mut handle = session.start()?;
    while let Some(event) = handle.next_event().await {
        match event {
            AuthEvent::CodeNeeded(phone) => {
                let code = prompt(input, &format!("Code sent to {}: ", phone)).await?;
                handle.submit_code(code)?;
            }
            AuthEvent::PasswordNeeded => {
                let password = prompt(input, "Two-step password: ").await?;
                handle.submit_password(password)?;
            }
            AuthEvent::Success | AuthEvent::Error(_) => break,
        }
    }
    handle.wait().await?;
    Ok(())
}

async fn scan(
    session: &Arc<AuthSession>,
    config: &AppConfig,
    chat: &str,
    limit: usize,
) -> anyhow::Result<Vec<MediaItem>> {
    let job = ScanJob::new(Arc::clone(session), config.scan.clone());
    let mut handle = job.start(chat, limit)?;
    while let Some(event) = handle.next_event().await {
        match event {
            ScanEvent::Progress { percent, message } => println!("[{:>3}%] {}", percent, message),
            ScanEvent::Found(count) => println!("Found {} media files", count),
        }
    }
    Ok(handle.wait().await?)
}

fn print_inventory(items: &[MediaItem]) {
    for item in items {
        println!(
            "{:>8}  {:<8}  {:>10}  {}  {}",
            item.message_id,
            item.kind,
            format_optional_size(item.size),
            item.date.format("%Y-%m-%d %H:%M"),
            item.name
        );
    }
}

fn read_inventory(path: &Path) -> anyhow::Result<Vec<MediaItem>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading inventory {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

async fn download(
    session: &Arc<AuthSession>,
    config: &AppConfig,
    items: Vec<MediaItem>,
    dest: &Path,
    concurrency: usize,
) -> anyhow::Result<()> {
    let manager = DownloadManager::new(Arc::clone(session), config.download.clone());
    let mut handle = manager.start(items, dest, concurrency)?;

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping after the running transfers...");
            stop.stop();
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            DownloadEvent::Started { total } => println!("Downloading {} files", total),
            DownloadEvent::ItemStarted { message_id, name } => {
                println!("-> {} ({})", name, message_id)
            }
            DownloadEvent::Progress(snap) => println!(
                "   {} / {} total, {}, ETA {}",
                format_size(snap.item_received),
                format_size(snap.bytes_transferred),
                snap.speed_string(),
                snap.eta_string()
            ),
            DownloadEvent::ItemResumed { path, .. } => {
                println!("== {} already complete", path.display())
            }
            DownloadEvent::ItemCompleted { path, bytes, .. } => {
                println!("ok {} ({})", path.display(), format_size(bytes))
            }
            DownloadEvent::ItemFailed { message_id, error } => {
                println!("!! message {}: {}", message_id, error)
            }
            DownloadEvent::Finished(summary) => {
                println!(
                    "Done: {} ok ({} resumed), {} failed, {} not started{}",
                    summary.ok,
                    summary.resumed,
                    summary.fail,
                    summary.not_started,
                    if summary.cancelled { " (stopped)" } else { "" }
                );
            }
        }
    }

    handle.wait().await?;
    Ok(())
}
