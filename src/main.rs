use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{error, info, warn};
use serde::Deserialize;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, Message, MessageId};
use tokio::sync::Mutex;
use uuid::Uuid;

mod callback_handlers;
mod errors;
mod helpers;
mod ids;
mod integrations;
mod message_handlers;
mod session;
mod store;
mod transport;

use callback_handlers::*;
use errors::*;
use helpers::*;
use ids::*;
use integrations::*;
use message_handlers::*;
use session::*;
use store::*;
use transport::*;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
struct Config {
    #[serde(default)]
    token: Option<String>,
    #[serde(default = "default_resources_dir")]
    resources_dir: PathBuf,
    #[serde(default)]
    temp_dir: Option<PathBuf>,
    #[serde(default = "default_max_upload_bytes")]
    max_upload_bytes: u64,
    #[serde(default)]
    allowed_user_ids: Vec<u64>,
    #[serde(default = "default_ffmpeg_bin")]
    ffmpeg_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    ffprobe_bin: String,
    #[serde(default = "default_ytdlp_bin")]
    ytdlp_bin: String,
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("./resources")
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

impl Config {
    /// Environment-only setup used when no config file is given.
    fn from_env() -> Result<Self> {
        let mut config: Config = toml::from_str("").context("build default config")?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if self.token.is_none() {
            self.token = lookup("BOT_TOKEN").filter(|token| !token.trim().is_empty());
        }
        if let Some(dir) = lookup("RESOURCES_DIR") {
            self.resources_dir = PathBuf::from(dir);
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit
                .trim()
                .parse()
                .with_context(|| format!("parse MAX_UPLOAD_BYTES {:?}", limit))?;
        }
        if let Some(ids) = lookup("ALLOWED_USER_IDS") {
            self.allowed_user_ids = parse_user_ids(&ids)?;
        }
        if let Some(bin) = lookup("FFMPEG_BIN") {
            self.ffmpeg_bin = bin;
        }
        if let Some(bin) = lookup("FFPROBE_BIN") {
            self.ffprobe_bin = bin;
        }
        if let Some(bin) = lookup("YTDLP_BIN") {
            self.ytdlp_bin = bin;
        }
        Ok(())
    }

    fn token(&self) -> Result<String> {
        self.token
            .clone()
            .ok_or_else(|| anyhow!("bot token missing: set `token` in the config or BOT_TOKEN"))
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.resources_dir.join(".incoming"))
    }

    fn is_allowed(&self, user_id: u64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id)
    }
}

fn parse_user_ids(text: &str) -> Result<Vec<u64>> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .with_context(|| format!("invalid user id {:?}", part))
        })
        .collect()
}

#[derive(Parser, Debug)]
struct Args {
    /// TOML config file; without it everything comes from the environment.
    #[arg(long, env = "VIDEOSHELF_CONFIG")]
    config: Option<PathBuf>,
}

struct AppState {
    config: Config,
    store: ResourceStore,
    sessions: SessionManager,
    trimmer: Arc<dyn MediaTrimmer>,
    fetcher: Arc<dyn VideoFetcher>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::from_env()?,
    };
    let token = config.token()?;

    let store = ResourceStore::open(&config.resources_dir, &config.temp_dir())
        .context("open resources dir")?;
    let stale = store.purge_temp().context("clean temp dir")?;
    if stale > 0 {
        info!("removed {} stale temp entries", stale);
    }
    info!(
        "storing videos under {} (upload limit {})",
        store.root().display(),
        human_size(config.max_upload_bytes)
    );

    let state = AppState {
        trimmer: Arc::new(FfmpegTrimmer::new(
            config.ffmpeg_bin.clone(),
            config.ffprobe_bin.clone(),
        )),
        fetcher: Arc::new(YtDlpFetcher::new(
            config.ytdlp_bin.clone(),
            config.max_upload_bytes,
        )),
        config,
        store,
        sessions: SessionManager::default(),
    };

    let state = Arc::new(state);

    let bot = Bot::new(token);

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let envelope = match Envelope::from_message(&msg) {
        Some(envelope) => envelope,
        None => return Ok(()),
    };

    let user_id = envelope.user_id;
    if !state.config.is_allowed(user_id) {
        warn!("ignoring message from unlisted user {}", user_id);
        return Ok(());
    }

    if let Err(err) = on_message(&bot, &state, envelope).await {
        error!("failed to answer user {}: {:#}", user_id, err);
        state.sessions.clear(user_id).await;
    }
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> Result<()> {
    let user_id = q.from.id.0;
    if !state.config.is_allowed(user_id) {
        return Ok(());
    }

    let (Some(message), Some(data)) = (q.message.as_ref(), q.data.clone()) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let press = ButtonPress {
        user_id,
        chat_id: message.chat.id,
        message_id: message.id,
        query_id: q.id.clone(),
        data,
    };
    if let Err(err) = on_callback(&bot, &state, press).await {
        error!("failed to answer callback from user {}: {:#}", user_id, err);
        state.sessions.clear(user_id).await;
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: Config = toml::from_str(&contents).context("parse config")?;
    config.apply_env(|key| match key {
        "BOT_TOKEN" => std::env::var(key).ok(),
        _ => None,
    })?;
    Ok(config)
}
