use super::*;

const SAVE_PREFIX: &str = "save";
const VIEW_PREFIX: &str = "view";
const SEND_ALL_PREFIX: &str = "sendall";
const DELETE_FOLDER_PREFIX: &str = "rmdir";
const PLAY_PREFIX: &str = "play_";
const PICK_DELETE_FOLDER_PREFIX: &str = "rmvf_";
const DELETE_VIDEO_PREFIX: &str = "rmv_";

/// Decoded inline button payload. Folder-carrying variants keep the raw
/// payload and are resolved against the current folder list; token variants
/// are resolved against the session's browse scratch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CallbackAction {
    UploadFull,
    UploadTrim,
    SaveTo(String),
    RandomName,
    CustomName,
    ViewFolder(String),
    Play(String),
    SendAll(String),
    BackToFolders,
    DeleteFolder(String),
    PickDeleteFolder(String),
    DeleteVideo(String),
    BackToDeleteFolders,
    ClearConfirm,
    ClearCancel,
}

impl CallbackAction {
    pub(crate) fn save_to(folder: &str) -> Self {
        CallbackAction::SaveTo(safe_callback_data(SAVE_PREFIX, &[folder]))
    }

    pub(crate) fn view_folder(folder: &str) -> Self {
        CallbackAction::ViewFolder(safe_callback_data(VIEW_PREFIX, &[folder]))
    }

    pub(crate) fn send_all(folder: &str) -> Self {
        CallbackAction::SendAll(safe_callback_data(SEND_ALL_PREFIX, &[folder]))
    }

    pub(crate) fn delete_folder(folder: &str) -> Self {
        CallbackAction::DeleteFolder(safe_callback_data(DELETE_FOLDER_PREFIX, &[folder]))
    }

    pub(crate) fn data(&self) -> String {
        match self {
            CallbackAction::UploadFull => "upload_full".to_string(),
            CallbackAction::UploadTrim => "upload_trim".to_string(),
            CallbackAction::RandomName => "random_name".to_string(),
            CallbackAction::CustomName => "custom_name".to_string(),
            CallbackAction::BackToFolders => "back_to_folders".to_string(),
            CallbackAction::BackToDeleteFolders => "back_to_delete".to_string(),
            CallbackAction::ClearConfirm => "clear_confirm".to_string(),
            CallbackAction::ClearCancel => "clear_cancel".to_string(),
            CallbackAction::SaveTo(data)
            | CallbackAction::ViewFolder(data)
            | CallbackAction::SendAll(data)
            | CallbackAction::DeleteFolder(data) => data.clone(),
            CallbackAction::Play(token) => format!("{}{}", PLAY_PREFIX, token),
            CallbackAction::PickDeleteFolder(token) => {
                format!("{}{}", PICK_DELETE_FOLDER_PREFIX, token)
            }
            CallbackAction::DeleteVideo(token) => format!("{}{}", DELETE_VIDEO_PREFIX, token),
        }
    }

    pub(crate) fn parse(data: &str) -> Option<Self> {
        let fixed = match data {
            "upload_full" => Some(CallbackAction::UploadFull),
            "upload_trim" => Some(CallbackAction::UploadTrim),
            "random_name" => Some(CallbackAction::RandomName),
            "custom_name" => Some(CallbackAction::CustomName),
            "back_to_folders" => Some(CallbackAction::BackToFolders),
            "back_to_delete" => Some(CallbackAction::BackToDeleteFolders),
            "clear_confirm" => Some(CallbackAction::ClearConfirm),
            "clear_cancel" => Some(CallbackAction::ClearCancel),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }
        if let Some(token) = data.strip_prefix(PLAY_PREFIX) {
            return Some(CallbackAction::Play(token.to_string()));
        }
        if let Some(token) = data.strip_prefix(PICK_DELETE_FOLDER_PREFIX) {
            return Some(CallbackAction::PickDeleteFolder(token.to_string()));
        }
        if let Some(token) = data.strip_prefix(DELETE_VIDEO_PREFIX) {
            return Some(CallbackAction::DeleteVideo(token.to_string()));
        }
        let folder_payload = |prefix: &str| data.starts_with(&format!("{}_", prefix));
        if folder_payload(SAVE_PREFIX) {
            Some(CallbackAction::SaveTo(data.to_string()))
        } else if folder_payload(VIEW_PREFIX) {
            Some(CallbackAction::ViewFolder(data.to_string()))
        } else if folder_payload(SEND_ALL_PREFIX) {
            Some(CallbackAction::SendAll(data.to_string()))
        } else if folder_payload(DELETE_FOLDER_PREFIX) {
            Some(CallbackAction::DeleteFolder(data.to_string()))
        } else {
            None
        }
    }
}

/// A pressed inline button, stripped of the platform types.
#[derive(Clone, Debug)]
pub(crate) struct ButtonPress {
    pub(crate) user_id: u64,
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
    pub(crate) query_id: String,
    pub(crate) data: String,
}

pub(crate) async fn on_callback(
    transport: &dyn Transport,
    state: &AppState,
    press: ButtonPress,
) -> Result<()> {
    let mut session = state.sessions.lock(press.user_id).await;
    let outcome = match CallbackAction::parse(&press.data) {
        Some(action) => dispatch_callback(transport, state, &mut session, &press, action).await,
        None => {
            warn!("unknown callback payload from {}: {}", press.user_id, press.data);
            Ok(None)
        }
    };
    let toast = match outcome {
        Ok(toast) => toast,
        Err(err) => {
            error!("callback handler failed for user {}: {:#}", press.user_id, err);
            session.reset();
            transport
                .post_text(press.chat_id, &describe_failure(&err))
                .await?;
            None
        }
    };
    if let Err(err) = transport.ack_callback(&press.query_id, toast.as_deref()).await {
        warn!("failed to answer callback {}: {:#}", press.query_id, err);
    }
    Ok(())
}

/// Returns an optional toast shown with the callback answer.
async fn dispatch_callback(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    press: &ButtonPress,
    action: CallbackAction,
) -> Result<Option<String>> {
    let chat_id = press.chat_id;
    let message_id = press.message_id;
    match action {
        CallbackAction::UploadFull => {
            if session.pending().is_none() {
                transport.replace_text(chat_id, message_id, VIDEO_MISSING).await?;
                return Ok(None);
            }
            session.set_awaiting(Awaiting::Idle);
            show_save_folder_menu(transport, state, chat_id, Some(message_id)).await?;
        }
        CallbackAction::UploadTrim => {
            let Some(source) = session.pending().map(|pending| pending.path.clone()) else {
                transport.replace_text(chat_id, message_id, VIDEO_MISSING).await?;
                return Ok(None);
            };
            let trimmer = state.trimmer.clone();
            let probe = tokio::task::spawn_blocking(move || trimmer.duration(&source))
                .await
                .context("duration probe task")?;
            let duration = probe.map_err(|err| FlowError::fetch("ffprobe", &err))?;
            session.set_awaiting(Awaiting::TrimStart { duration });
            let text = format!(
                "Video duration: {} seconds.\nEnter the trim start in seconds (from 0 to {}):",
                format_seconds(duration),
                format_seconds(duration)
            );
            transport.replace_text(chat_id, message_id, &text).await?;
        }
        CallbackAction::SaveTo(data) => {
            if session.pending().is_none() {
                transport.replace_text(chat_id, message_id, VIDEO_MISSING).await?;
                return Ok(None);
            }
            let folders = state.store.list_folders()?;
            let Some(folder) = match_safe_callback(SAVE_PREFIX, &data, &folders).cloned() else {
                show_save_folder_menu(transport, state, chat_id, Some(message_id)).await?;
                return Ok(Some(FOLDER_MISSING.to_string()));
            };
            if let Some(pending) = session.pending_mut() {
                pending.folder = Some(folder.clone());
            }
            session.set_awaiting(Awaiting::Idle);
            let text = format!("Folder: {}\nHow should the file be named?", folder);
            transport
                .replace_menu(chat_id, message_id, &text, filename_mode_keyboard())
                .await?;
        }
        CallbackAction::RandomName => {
            let Some(pending) = session.pending() else {
                transport.replace_text(chat_id, message_id, VIDEO_MISSING).await?;
                return Ok(None);
            };
            let Some(folder) = pending.folder.clone() else {
                show_save_folder_menu(transport, state, chat_id, Some(message_id)).await?;
                return Ok(None);
            };
            let mut name = pending.default_filename();
            if state.store.video_path(&folder, &name).is_ok() {
                let short = Uuid::new_v4().simple().to_string();
                name = format!(
                    "video_{}_{}.{}",
                    pending.received_at.format("%Y%m%d_%H%M%S"),
                    &short[..6],
                    pending.extension()
                );
            }
            commit_pending(transport, state, session, chat_id, Some(message_id), &folder, &name)
                .await?;
        }
        CallbackAction::CustomName => {
            let has_folder = session
                .pending()
                .map(|pending| pending.folder.is_some())
                .unwrap_or(false);
            if !has_folder {
                transport.replace_text(chat_id, message_id, VIDEO_MISSING).await?;
                return Ok(None);
            }
            session.set_awaiting(Awaiting::Filename);
            transport
                .replace_text(
                    chat_id,
                    message_id,
                    "Send the file name (the extension is optional), or /cancel to abort.",
                )
                .await?;
        }
        CallbackAction::ViewFolder(data) => {
            let folders = state.store.list_folders()?;
            let Some(folder) = match_safe_callback(VIEW_PREFIX, &data, &folders).cloned() else {
                render_folder_browser(transport, state, chat_id, Some(message_id)).await?;
                return Ok(Some(FOLDER_MISSING.to_string()));
            };
            let videos = state.store.list_videos(&folder)?;
            let map = IdentifierMap::build(&folder, &videos);
            let (text, menu) = build_browse_files_view(&map);
            session.browse.files = Some(map);
            transport.replace_menu(chat_id, message_id, &text, menu).await?;
        }
        CallbackAction::Play(token) => {
            let file_ref = session
                .browse
                .files
                .as_ref()
                .and_then(|map| map.resolve(&token))
                .cloned();
            let Some(file_ref) = file_ref else {
                return Ok(Some(VIDEO_NOT_FOUND.to_string()));
            };
            let path = match state.store.video_path(&file_ref.folder, &file_ref.file) {
                Ok(path) => path,
                Err(StoreError::NotFound(_)) => return Ok(Some(VIDEO_NOT_FOUND.to_string())),
                Err(err) => return Err(FlowError::from(err).into()),
            };
            transport.deliver_video(chat_id, &path, &file_ref.file).await?;
        }
        CallbackAction::SendAll(data) => {
            let folders = state.store.list_folders()?;
            let Some(folder) = match_safe_callback(SEND_ALL_PREFIX, &data, &folders).cloned() else {
                return Ok(Some(FOLDER_MISSING.to_string()));
            };
            let videos = state.store.list_videos(&folder)?;
            session.browse.files = Some(IdentifierMap::build(&folder, &videos));
            send_all_videos(transport, state, chat_id, &folder, &videos).await?;
        }
        CallbackAction::BackToFolders => {
            render_folder_browser(transport, state, chat_id, Some(message_id)).await?;
        }
        CallbackAction::DeleteFolder(data) => {
            let folders = state.store.list_folders()?;
            let Some(folder) = match_safe_callback(DELETE_FOLDER_PREFIX, &data, &folders).cloned()
            else {
                transport.replace_text(chat_id, message_id, FOLDER_MISSING).await?;
                return Ok(None);
            };
            let removed = state.store.delete_folder(&folder)?;
            let stale_listing = session
                .browse
                .files
                .as_ref()
                .map(|map| map.folder() == folder)
                .unwrap_or(false);
            if stale_listing {
                session.browse.files = None;
            }
            let text = format!("Folder '{}' deleted.\nVideos removed: {}", folder, removed);
            transport.replace_text(chat_id, message_id, &text).await?;
        }
        CallbackAction::PickDeleteFolder(token) => {
            let folder = session
                .browse
                .delete_folders
                .as_ref()
                .and_then(|map| map.resolve(&token))
                .map(|folder| folder.to_string());
            let Some(folder) = folder.filter(|folder| state.store.folder_exists(folder)) else {
                transport.replace_text(chat_id, message_id, FOLDER_MISSING).await?;
                return Ok(None);
            };
            render_delete_video_files(transport, state, session, chat_id, message_id, &folder)
                .await?;
        }
        CallbackAction::DeleteVideo(token) => {
            let file_ref = session
                .browse
                .files
                .as_ref()
                .and_then(|map| map.resolve(&token))
                .cloned();
            let Some(file_ref) = file_ref else {
                return Ok(Some(VIDEO_NOT_FOUND.to_string()));
            };
            let toast = match state.store.delete_video(&file_ref.folder, &file_ref.file) {
                Ok(()) => format!("Video '{}' deleted.", file_ref.file),
                Err(StoreError::NotFound(_)) => VIDEO_NOT_FOUND.to_string(),
                Err(err) => return Err(FlowError::from(err).into()),
            };
            if state.store.folder_exists(&file_ref.folder) {
                render_delete_video_files(
                    transport,
                    state,
                    session,
                    chat_id,
                    message_id,
                    &file_ref.folder,
                )
                .await?;
            } else {
                session.browse.files = None;
                transport.replace_text(chat_id, message_id, FOLDER_MISSING).await?;
            }
            return Ok(Some(toast));
        }
        CallbackAction::BackToDeleteFolders => {
            render_delete_video_folders(transport, state, session, chat_id, Some(message_id))
                .await?;
        }
        CallbackAction::ClearConfirm => {
            let status = transport.post_text(chat_id, "Clearing the chat...").await?;
            let deleted =
                sweep_chat(transport, chat_id, message_id, Some(status), SweepLimits::default())
                    .await;
            info!("chat {} cleared: {} messages deleted", chat_id.0, deleted);
            let text = format!("Chat cleared.\nDeleted messages: {}", deleted);
            transport.replace_text(chat_id, status, &text).await?;
        }
        CallbackAction::ClearCancel => {
            transport
                .replace_text(chat_id, message_id, "Chat clearing cancelled.")
                .await?;
        }
    }
    Ok(None)
}

const FOLDER_MISSING: &str = "Folder not found. It may have been deleted.";
const VIDEO_NOT_FOUND: &str = "Video not found.";

async fn send_all_videos(
    transport: &dyn Transport,
    state: &AppState,
    chat_id: ChatId,
    folder: &str,
    videos: &[String],
) -> Result<()> {
    if videos.is_empty() {
        transport
            .post_text(chat_id, &format!("Folder '{}' has no videos.", folder))
            .await?;
        return Ok(());
    }
    let total = videos.len();
    let status = transport
        .post_text(
            chat_id,
            &format!("Sending {} videos from '{}'...", total, folder),
        )
        .await?;
    let mut failed = 0usize;
    for (idx, name) in videos.iter().enumerate() {
        let caption = format!("{} ({}/{})", name, idx + 1, total);
        let sent = match state.store.video_path(folder, name) {
            Ok(path) => transport.deliver_video(chat_id, &path, &caption).await,
            Err(err) => Err(err.into()),
        };
        let progress = match sent {
            Ok(()) => format!("Sent {} of {} videos...", idx + 1, total),
            Err(err) => {
                warn!("failed to send {}/{}: {:#}", folder, name, err);
                failed += 1;
                format!("Failed to send {}. Continuing...", name)
            }
        };
        transport.replace_text(chat_id, status, &progress).await?;
    }
    let summary = if failed == 0 {
        format!("All {} videos from '{}' sent.", total, folder)
    } else {
        format!(
            "Sent {} of {} videos from '{}'. Failed: {}",
            total - failed,
            total,
            folder,
            failed
        )
    };
    transport.replace_text(chat_id, status, &summary).await?;
    Ok(())
}

async fn render_delete_video_files(
    transport: &dyn Transport,
    state: &AppState,
    session: &mut UserSession,
    chat_id: ChatId,
    message_id: MessageId,
    folder: &str,
) -> Result<()> {
    let videos = state.store.list_videos(folder)?;
    let map = IdentifierMap::build(folder, &videos);
    let (text, menu) = build_delete_video_files_view(&map);
    session.browse.files = Some(map);
    transport.replace_menu(chat_id, message_id, &text, menu).await
}
