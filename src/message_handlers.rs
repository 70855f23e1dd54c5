use super::*;

pub(crate) const VIDEO_MISSING: &str = "Video not found. Please upload it again.";
const NOT_RECOGNIZED: &str = "Command not recognized. Use /help for the list of commands.";

/// Inbound message content the flows care about.
#[derive(Clone, Debug)]
pub(crate) enum Inbound {
    Command { name: String, args: String },
    Text(String),
    Video {
        file_id: String,
        size: u64,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Envelope {
    pub(crate) user_id: u64,
    pub(crate) chat_id: ChatId,
    pub(crate) inbound: Inbound,
}

impl Envelope {
    /// Returns `None` for messages with no sender or nothing the bot handles.
    pub(crate) fn from_message(msg: &Message) -> Option<Self> {
        let user_id = msg.from()?.id.0;
        let inbound = if let Some(video) = msg.video() {
            Inbound::Video {
                file_id: video.file.id.clone(),
                size: u64::from(video.file.size),
                file_name: video.file_name.clone(),
                mime: video.mime_type.as_ref().map(|mime| mime.to_string()),
            }
        } else if let Some(document) = msg
            .document()
            .filter(|doc| is_video_document(doc.mime_type.as_ref().map(|m| m.essence_str())))
        {
            Inbound::Video {
                file_id: document.file.id.clone(),
                size: u64::from(document.file.size),
                file_name: document.file_name.clone(),
                mime: document.mime_type.as_ref().map(|mime| mime.to_string()),
            }
        } else {
            let text = msg.text()?;
            match parse_command(text) {
                Some(name) => Inbound::Command {
                    name: name.to_string(),
                    args: command_args(text).to_string(),
                },
                None => Inbound::Text(text.to_string()),
            }
        };
        Some(Envelope {
            user_id,
            chat_id: msg.chat.id,
            inbound,
        })
    }
}

fn is_video_document(mime: Option<&str>) -> bool {
    mime.map(|mime| mime.starts_with("video/")).unwrap_or(false)
}

pub(crate) fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.trim_start_matches('/');
    Some(cmd.split('@').next().unwrap_or(cmd))
}

fn command_args(text: &str) -> &str {
    text.trim()
        .splitn(2, |c: char| c.is_whitespace())
        .nth(1)
        .unwrap_or("")
        .trim()
}

pub(crate) async fn on_message(
    transport: &dyn Transport,
    state: &AppState,
    envelope: Envelope,
) -> Result<()> {
    let mut session = state.sessions.lock(envelope.user_id).await;
    let chat_id = envelope.chat_id;
    let outcome = match envelope.inbound {
        Inbound::Command { name, args } => {
            handle_command(transport, state, &mut session, chat_id, &name, &args).await
        }
        Inbound::Text(text) => handle_text(transport, state, &mut session, chat_id, &text).await,
        Inbound::Video {
            file_id,
            size,
            file_name,
            mime,
        } => {
            let extension = upload_extension(file_name.as_deref(), mime.as_deref());
            handle_video(transport, state, &mut session, chat_id, &file_id, size, &extension).await
        }
    };
    if let Err(err) = outcome {
        error!("message handler failed for user {}: {:#}", envelope.user_id, err);
        session.reset();
        transport.post_text(chat_id, &describe_failure(&err)).await?;
    }
    Ok(())
}

async fn handle_command(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    name: &str,
    args: &str,
) -> Result<()> {
    match name {
        "start" => {
            let text = "Hi! I keep your videos organized in folders.\n\
                        Send me a video to upload it, or use /help to see every command.";
            transport.post_text(chat_id, text).await?;
        }
        "help" => {
            transport
                .post_text(chat_id, &help_text(state.config.max_upload_bytes))
                .await?;
        }
        "cancel" => {
            session.reset();
            transport
                .post_text(chat_id, "Operation cancelled. Context cleared.")
                .await?;
        }
        "create_folder" => {
            session.set_awaiting(Awaiting::Idle);
            if args.is_empty() {
                session.set_awaiting(Awaiting::FolderName);
                transport
                    .post_text(
                        chat_id,
                        "Send the name of the new folder, or /cancel to abort.",
                    )
                    .await?;
            } else {
                create_folder_from_text(transport, state, session, chat_id, args).await?;
            }
        }
        "list" => {
            session.set_awaiting(Awaiting::Idle);
            let summary = build_resources_summary(&state.store)?;
            transport.post_text(chat_id, &summary).await?;
        }
        "folders" => {
            session.set_awaiting(Awaiting::Idle);
            render_folder_browser(transport, state, chat_id, None).await?;
        }
        "delete_folder" => {
            session.set_awaiting(Awaiting::Idle);
            let folders = folders_with_counts(&state.store)?;
            let (text, menu) = build_delete_folder_view(&folders);
            post_view(transport, chat_id, &text, menu).await?;
        }
        "delete_video" => {
            session.set_awaiting(Awaiting::Idle);
            render_delete_video_folders(transport, state, session, chat_id, None).await?;
        }
        "clear" => {
            session.set_awaiting(Awaiting::Idle);
            transport
                .post_menu(
                    chat_id,
                    "Delete recent messages in this chat? This cannot be undone.",
                    clear_confirm_keyboard(),
                )
                .await?;
        }
        "download_from_url" => {
            session.set_awaiting(Awaiting::Idle);
            if args.is_empty() {
                session.set_awaiting(Awaiting::Url);
                transport
                    .post_text(
                        chat_id,
                        "Send a YouTube or Instagram link, or /cancel to abort.",
                    )
                    .await?;
            } else {
                fetch_from_url(transport, state, session, chat_id, args).await?;
            }
        }
        _ => {
            transport.post_text(chat_id, NOT_RECOGNIZED).await?;
        }
    }
    Ok(())
}

async fn handle_text(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    text: &str,
) -> Result<()> {
    match session.awaiting() {
        Awaiting::Idle => {
            transport.post_text(chat_id, NOT_RECOGNIZED).await?;
        }
        Awaiting::FolderName => {
            create_folder_from_text(transport, state, session, chat_id, text).await?;
        }
        Awaiting::Filename => {
            save_with_custom_name(transport, state, session, chat_id, text).await?;
        }
        Awaiting::TrimStart { duration } => {
            let Some(start) = parse_seconds(text) else {
                transport.post_text(chat_id, "Please enter a number.").await?;
                return Ok(());
            };
            if start < 0.0 || start >= duration {
                let text = format!(
                    "The start must be from 0 to below {} seconds. Try again:",
                    format_seconds(duration)
                );
                transport.post_text(chat_id, &text).await?;
                return Ok(());
            }
            session.set_awaiting(Awaiting::TrimEnd { duration, start });
            let text = format!(
                "Enter the trim end in seconds (from {} to {}):",
                format_seconds(start),
                format_seconds(duration)
            );
            transport.post_text(chat_id, &text).await?;
        }
        Awaiting::TrimEnd { duration, start } => {
            let Some(end) = parse_seconds(text) else {
                transport.post_text(chat_id, "Please enter a number.").await?;
                return Ok(());
            };
            if end <= start || end > duration {
                let text = format!(
                    "The end must be above {} and at most {} seconds. Try again:",
                    format_seconds(start),
                    format_seconds(duration)
                );
                transport.post_text(chat_id, &text).await?;
                return Ok(());
            }
            trim_pending(transport, state, session, chat_id, start, end).await?;
        }
        Awaiting::Url => {
            fetch_from_url(transport, state, session, chat_id, text).await?;
        }
    }
    Ok(())
}

async fn handle_video(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    file_id: &str,
    size: u64,
    extension: &str,
) -> Result<()> {
    let limit = state.config.max_upload_bytes;
    if size > limit {
        let text = format!(
            "Sorry, the file is too large ({}). Maximum size is {}.",
            megabytes(size),
            human_size(limit)
        );
        transport.post_text(chat_id, &text).await?;
        return Ok(());
    }
    let temp_path = state.store.new_temp_path(extension);
    if let Err(err) = transport.fetch_file(file_id, &temp_path).await {
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        return Err(err.context("download uploaded video"));
    }
    let size = fs::metadata(&temp_path).map(|meta| meta.len()).unwrap_or(size);
    info!("video received: {} ({} bytes)", temp_path.display(), size);
    install_pending(transport, session, chat_id, PendingUpload::new(temp_path, size)).await?;
    transport
        .post_menu(chat_id, "Choose how to upload the video:", upload_mode_keyboard())
        .await?;
    Ok(())
}

/// Last write wins: a newer video replaces an unsaved one.
async fn install_pending(
    transport: &dyn Transport,
    session: &mut UserSession,
    chat_id: ChatId,
    upload: PendingUpload,
) -> Result<()> {
    session.set_awaiting(Awaiting::Idle);
    if session.replace_pending(upload) {
        transport
            .post_text(chat_id, "Your previous unsaved video was discarded.")
            .await?;
    }
    Ok(())
}

/// Picks the extension for a new temp file from the upload's name or MIME type.
pub(crate) fn upload_extension(file_name: Option<&str>, mime: Option<&str>) -> String {
    if let Some(ext) = file_name.and_then(video_extension) {
        return ext;
    }
    let by_mime = match mime.map(|mime| mime.to_ascii_lowercase()) {
        Some(mime) if mime.starts_with("video/quicktime") => Some("mov"),
        Some(mime) if mime.starts_with("video/x-msvideo") || mime.starts_with("video/avi") => {
            Some("avi")
        }
        _ => None,
    };
    by_mime.unwrap_or(DEFAULT_VIDEO_EXTENSION).to_string()
}

async fn create_folder_from_text(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    text: &str,
) -> Result<()> {
    match state.store.create_folder(text) {
        Ok(folder) => {
            session.set_awaiting(Awaiting::Idle);
            transport
                .post_text(chat_id, &format!("Folder '{}' is ready.", folder))
                .await?;
        }
        Err(StoreError::InvalidName(_)) | Err(StoreError::AlreadyExists(_)) => {
            session.set_awaiting(Awaiting::FolderName);
            transport
                .post_text(
                    chat_id,
                    "That name cannot be used for a folder. Send another name, or /cancel to abort.",
                )
                .await?;
        }
        Err(err) => return Err(FlowError::from(err).into()),
    }
    Ok(())
}

async fn save_with_custom_name(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    text: &str,
) -> Result<()> {
    let Some(pending) = session.pending() else {
        session.set_awaiting(Awaiting::Idle);
        transport.post_text(chat_id, VIDEO_MISSING).await?;
        return Ok(());
    };
    let Some(folder) = pending.folder.clone() else {
        session.set_awaiting(Awaiting::Idle);
        show_save_folder_menu(transport, state, chat_id, None).await?;
        return Ok(());
    };
    let extension = pending.extension();
    let name = match sanitize_segment(text) {
        Ok(name) => fit_video_filename(&name, &extension),
        Err(_) => {
            transport
                .post_text(
                    chat_id,
                    "That file name cannot be used. Send another name, or /cancel to abort.",
                )
                .await?;
            return Ok(());
        }
    };
    commit_pending(transport, state, session, chat_id, None, &folder, &name).await
}

/// Moves the pending upload into `folder`. A name collision keeps the upload
/// and asks for another name; any other failure drops it.
pub(crate) async fn commit_pending(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    edit: Option<MessageId>,
    folder: &str,
    filename: &str,
) -> Result<()> {
    let Some(pending) = session.take_pending() else {
        session.set_awaiting(Awaiting::Idle);
        return reply(transport, chat_id, edit, VIDEO_MISSING).await;
    };
    let trim = pending.trim;
    match state.store.commit(pending, folder, filename) {
        Ok(video) => {
            session.set_awaiting(Awaiting::Idle);
            let text = build_commit_text(folder, &video, trim);
            reply(transport, chat_id, edit, &text).await
        }
        Err(CommitError {
            error: StoreError::AlreadyExists(existing),
            pending,
        }) => {
            session.replace_pending(pending);
            session.set_awaiting(Awaiting::Filename);
            let text = format!(
                "A video named '{}' already exists in '{}'. Send another name, or /cancel to abort.",
                existing, folder
            );
            reply(transport, chat_id, edit, &text).await
        }
        Err(CommitError { error, pending }) => {
            pending.discard();
            session.set_awaiting(Awaiting::Idle);
            Err(FlowError::from(error).into())
        }
    }
}

async fn trim_pending(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    start: f64,
    end: f64,
) -> Result<()> {
    let Some((source, extension)) = session
        .pending()
        .map(|pending| (pending.path.clone(), pending.extension()))
    else {
        session.set_awaiting(Awaiting::Idle);
        transport.post_text(chat_id, VIDEO_MISSING).await?;
        return Ok(());
    };
    let status = transport.post_text(chat_id, "Trimming the video...").await?;
    let dest = state.store.new_temp_path(&extension);
    let trimmer = state.trimmer.clone();
    let (job_source, job_dest) = (source.clone(), dest.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        trimmer.trim(&job_source, start, end, &job_dest)
    })
    .await
    .context("trim task")?;
    if let Err(err) = outcome {
        if dest.exists() {
            let _ = fs::remove_file(&dest);
        }
        return Err(FlowError::fetch("ffmpeg", &err).into());
    }
    if let Some(pending) = session.pending_mut() {
        pending.size = fs::metadata(&dest).map(|meta| meta.len()).unwrap_or(pending.size);
        pending.path = dest;
        pending.trim = Some(TrimBounds { start, end });
    }
    if let Err(err) = fs::remove_file(&source) {
        warn!("failed to remove untrimmed file {}: {}", source.display(), err);
    }
    session.set_awaiting(Awaiting::Idle);
    let text = format!(
        "Trimmed to {}-{} seconds.",
        format_seconds(start),
        format_seconds(end)
    );
    transport.replace_text(chat_id, status, &text).await?;
    show_save_folder_menu(transport, state, chat_id, None).await
}

async fn fetch_from_url(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    text: &str,
) -> Result<()> {
    let (url, provider) = match parse_video_url(text) {
        Ok(parsed) => parsed,
        Err(rejection) => {
            session.set_awaiting(Awaiting::Url);
            let text = format!("{}\nSend another link, or /cancel to abort.", rejection.message());
            transport.post_text(chat_id, &text).await?;
            return Ok(());
        }
    };
    session.set_awaiting(Awaiting::Idle);
    let status = transport
        .post_text(chat_id, &format!("Downloading from {}...", provider.name()))
        .await?;

    // Dropping the work dir removes whatever the fetcher left behind.
    let work_dir = tempfile::Builder::new()
        .prefix("fetch_")
        .tempdir_in(state.store.temp_dir())
        .context("create download dir")?;
    let fetcher = state.fetcher.clone();
    let target = work_dir.path().to_path_buf();
    let job_url = url.clone();
    let fetched = tokio::task::spawn_blocking(move || fetcher.fetch(&job_url, provider, &target))
        .await
        .context("download task")?;
    let fetched = match fetched {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!("{} download failed for {}: {:#}", provider.name(), url, err);
            let text = format!(
                "Failed to download the video from {}.\n{}",
                provider.name(),
                trim_tail(&format!("{:#}", err), 300)
            );
            transport.replace_text(chat_id, status, &text).await?;
            return Ok(());
        }
    };
    let limit = state.config.max_upload_bytes;
    if fetched.size > limit {
        let text = format!(
            "The video is too large ({}). Maximum size is {}.",
            megabytes(fetched.size),
            human_size(limit)
        );
        transport.replace_text(chat_id, status, &text).await?;
        return Ok(());
    }

    let extension = fetched
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(video_extension)
        .unwrap_or_else(|| DEFAULT_VIDEO_EXTENSION.to_string());
    let temp_path = state.store.new_temp_path(&extension);
    fs::rename(&fetched.path, &temp_path)
        .with_context(|| format!("move download into {}", temp_path.display()))?;
    info!("video fetched from {}: {} ({} bytes)", url, temp_path.display(), fetched.size);
    install_pending(transport, session, chat_id, PendingUpload::new(temp_path, fetched.size))
        .await?;
    transport
        .replace_menu(
            chat_id,
            status,
            &format!(
                "Video downloaded from {} ({}).\nChoose how to upload the video:",
                provider.name(),
                megabytes(fetched.size)
            ),
            upload_mode_keyboard(),
        )
        .await
}

/// Edits `edit` when given, otherwise posts a new message.
pub(crate) async fn reply(
    transport: &dyn Transport,
    chat_id: ChatId,
    edit: Option<MessageId>,
    text: &str,
) -> Result<()> {
    match edit {
        Some(message_id) => transport.replace_text(chat_id, message_id, text).await,
        None => transport.post_text(chat_id, text).await.map(|_| ()),
    }
}

async fn reply_menu(
    transport: &dyn Transport,
    chat_id: ChatId,
    edit: Option<MessageId>,
    text: &str,
    menu: InlineKeyboardMarkup,
) -> Result<()> {
    match edit {
        Some(message_id) => transport.replace_menu(chat_id, message_id, text, menu).await,
        None => transport.post_menu(chat_id, text, menu).await.map(|_| ()),
    }
}

async fn post_view(
    transport: &dyn Transport,
    chat_id: ChatId,
    text: &str,
    menu: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    match menu {
        Some(menu) => transport.post_menu(chat_id, text, menu).await.map(|_| ()),
        None => transport.post_text(chat_id, text).await.map(|_| ()),
    }
}

pub(crate) async fn show_save_folder_menu(
    transport: &dyn Transport,
    state: &AppState,
    chat_id: ChatId,
    edit: Option<MessageId>,
) -> Result<()> {
    let folders = state.store.list_folders()?;
    let (text, menu) = build_save_folder_view(&folders);
    reply_menu(transport, chat_id, edit, &text, menu).await
}

pub(crate) async fn render_folder_browser(
    transport: &dyn Transport,
    state: &AppState,
    chat_id: ChatId,
    edit: Option<MessageId>,
) -> Result<()> {
    let folders = folders_with_counts(&state.store)?;
    let (text, menu) = build_browse_folders_view(&folders);
    match menu {
        Some(menu) => reply_menu(transport, chat_id, edit, &text, menu).await,
        None => reply(transport, chat_id, edit, &text).await,
    }
}

pub(crate) async fn render_delete_video_folders(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    edit: Option<MessageId>,
) -> Result<()> {
    let folders = state.store.list_folders()?;
    let map = FolderIdMap::build(&folders);
    let (text, menu) = build_delete_video_folders_view(&map);
    session.browse.delete_folders = Some(map);
    match menu {
        Some(menu) => reply_menu(transport, chat_id, edit, &text, menu).await,
        None => reply(transport, chat_id, edit, &text).await,
    }
}
