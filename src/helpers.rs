use super::*;

pub(crate) const CLEAR_FAILURE_LIMIT: usize = 500;
pub(crate) const CLEAR_DELETE_LIMIT: usize = 1000;
const CLEAR_STATUS_EVERY: usize = 5;

pub(crate) fn help_text(max_upload_bytes: u64) -> String {
    format!(
        "Commands:\n\
         /start - start the bot\n\
         /help - show this message\n\
         /list - list videos in every folder\n\
         /folders - browse and play videos\n\
         /create_folder [name] - create a folder\n\
         /delete_folder - delete a folder with all its videos\n\
         /delete_video - delete a single video\n\
         /clear - delete recent messages in this chat\n\
         /download_from_url [url] - fetch a video from YouTube or Instagram\n\
         /cancel - abort the current operation\n\n\
         Send me a video to upload it; you can trim it and pick a folder afterwards.\n\
         Maximum size: {}.",
        human_size(max_upload_bytes)
    )
}

pub(crate) fn button(label: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.data())
}

pub(crate) fn upload_mode_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("Upload full video", CallbackAction::UploadFull)],
        vec![button("Trim video", CallbackAction::UploadTrim)],
    ])
}

pub(crate) fn filename_mode_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("Use generated name", CallbackAction::RandomName)],
        vec![button("Enter my own name", CallbackAction::CustomName)],
    ])
}

pub(crate) fn clear_confirm_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("Yes, clear", CallbackAction::ClearConfirm),
        button("No, cancel", CallbackAction::ClearCancel),
    ]])
}

/// Folder picker shown before committing a pending upload.
/// With no folders the upload-mode buttons stay, so the user can come back
/// after `/create_folder`.
pub(crate) fn build_save_folder_view(folders: &[String]) -> (String, InlineKeyboardMarkup) {
    if folders.is_empty() {
        return (
            "No folders yet. Create one with /create_folder, then choose the upload mode again."
                .to_string(),
            upload_mode_keyboard(),
        );
    }
    let rows = folders
        .iter()
        .map(|folder| vec![button(folder.clone(), CallbackAction::save_to(folder))])
        .collect::<Vec<_>>();
    (
        "Choose a folder for the video:".to_string(),
        InlineKeyboardMarkup::new(rows),
    )
}

pub(crate) fn build_browse_folders_view(
    folders: &[(String, usize)],
) -> (String, Option<InlineKeyboardMarkup>) {
    if folders.is_empty() {
        return ("No folders available.".to_string(), None);
    }
    let rows = folders
        .iter()
        .map(|(folder, count)| {
            vec![button(
                format!("{} ({} videos)", folder, count),
                CallbackAction::view_folder(folder),
            )]
        })
        .collect::<Vec<_>>();
    (
        "Choose a folder to browse:".to_string(),
        Some(InlineKeyboardMarkup::new(rows)),
    )
}

pub(crate) fn build_browse_files_view(map: &IdentifierMap) -> (String, InlineKeyboardMarkup) {
    let folder = map.folder();
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for (token, file_ref) in map.entries() {
        rows.push(vec![button(
            file_ref.file.clone(),
            CallbackAction::Play(token.to_string()),
        )]);
    }
    let mut nav = Vec::new();
    if !map.is_empty() {
        nav.push(button("Send all", CallbackAction::send_all(folder)));
    }
    nav.push(button("Back to folders", CallbackAction::BackToFolders));
    rows.push(nav);
    let text = if map.is_empty() {
        format!("Folder '{}' has no videos.", folder)
    } else {
        format!("Videos in '{}':", folder)
    };
    (text, InlineKeyboardMarkup::new(rows))
}

pub(crate) fn build_delete_folder_view(
    folders: &[(String, usize)],
) -> (String, Option<InlineKeyboardMarkup>) {
    if folders.is_empty() {
        return ("No folders to delete.".to_string(), None);
    }
    let rows = folders
        .iter()
        .map(|(folder, count)| {
            vec![button(
                format!("Delete {} ({} videos)", folder, count),
                CallbackAction::delete_folder(folder),
            )]
        })
        .collect::<Vec<_>>();
    (
        "Choose a folder to delete together with all its videos:".to_string(),
        Some(InlineKeyboardMarkup::new(rows)),
    )
}

pub(crate) fn build_delete_video_folders_view(
    map: &FolderIdMap,
) -> (String, Option<InlineKeyboardMarkup>) {
    let rows = map
        .entries()
        .map(|(token, folder)| {
            vec![button(
                folder.to_string(),
                CallbackAction::PickDeleteFolder(token.to_string()),
            )]
        })
        .collect::<Vec<_>>();
    if rows.is_empty() {
        return ("No folders to delete videos from.".to_string(), None);
    }
    (
        "Choose the folder of the video to delete:".to_string(),
        Some(InlineKeyboardMarkup::new(rows)),
    )
}

pub(crate) fn build_delete_video_files_view(map: &IdentifierMap) -> (String, InlineKeyboardMarkup) {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = map
        .entries()
        .map(|(token, file_ref)| {
            vec![button(
                format!("Delete {}", file_ref.file),
                CallbackAction::DeleteVideo(token.to_string()),
            )]
        })
        .collect();
    rows.push(vec![button("Back", CallbackAction::BackToDeleteFolders)]);
    let text = if map.is_empty() {
        format!("No videos left in '{}'.", map.folder())
    } else {
        format!("Choose a video to delete from '{}':", map.folder())
    };
    (text, InlineKeyboardMarkup::new(rows))
}

pub(crate) fn folders_with_counts(store: &ResourceStore) -> Result<Vec<(String, usize)>, StoreError> {
    let mut out = Vec::new();
    for folder in store.list_folders()? {
        let count = store.list_videos(&folder).map(|v| v.len()).unwrap_or(0);
        out.push((folder, count));
    }
    Ok(out)
}

/// Text summary of every folder and its videos for `/list`.
pub(crate) fn build_resources_summary(store: &ResourceStore) -> Result<String, StoreError> {
    let folders = store.list_folders()?;
    if folders.is_empty() {
        return Ok("No folders with videos.".to_string());
    }
    let mut text = String::from("Videos by folder:\n");
    let mut any = false;
    for folder in folders {
        // Folders made outside the bot may carry names lookups refuse.
        let videos = store.list_video_files(&folder).unwrap_or_default();
        if videos.is_empty() {
            continue;
        }
        any = true;
        text.push_str(&format!("\n{}:\n", folder));
        for (idx, video) in videos.iter().enumerate() {
            text.push_str(&format!("  {}. {} ({})\n", idx + 1, video.name, megabytes(video.size)));
        }
    }
    if !any {
        return Ok("All folders are empty.".to_string());
    }
    Ok(text.trim_end().to_string())
}

pub(crate) fn build_commit_text(folder: &str, video: &VideoFile, trim: Option<TrimBounds>) -> String {
    let mut text = format!(
        "Video saved to '{}'.\nFile name: {}\nSize: {}",
        folder,
        video.name,
        megabytes(video.size)
    );
    if let Some(trim) = trim {
        text.push_str(&format!(
            "\nTrimmed: {}-{} s",
            format_seconds(trim.start),
            format_seconds(trim.end)
        ));
    }
    text
}

pub(crate) fn format_seconds(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("{}", value as i64)
    } else {
        format!("{:.1}", value)
    }
}

pub(crate) fn parse_seconds(text: &str) -> Option<f64> {
    let value = text.trim().replace(',', ".").parse::<f64>().ok()?;
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SweepLimits {
    pub(crate) max_consecutive_failures: usize,
    pub(crate) max_deleted: usize,
    pub(crate) pause: Duration,
}

impl Default for SweepLimits {
    fn default() -> Self {
        SweepLimits {
            max_consecutive_failures: CLEAR_FAILURE_LIMIT,
            max_deleted: CLEAR_DELETE_LIMIT,
            pause: Duration::from_millis(10),
        }
    }
}

/// Best-effort backward sweep: message ids cannot be listed, so ids below
/// `from` are probed one by one. Stops on the failure streak limit, on the
/// deletion limit, or at id 0. Returns the number of deleted messages.
pub(crate) async fn sweep_chat(
    transport: &dyn Transport,
    chat_id: ChatId,
    from: MessageId,
    status: Option<MessageId>,
    limits: SweepLimits,
) -> usize {
    let mut deleted = 0usize;
    let mut failures = 0usize;
    let mut current = from.0;
    while current > 0 && failures < limits.max_consecutive_failures && deleted < limits.max_deleted {
        let id = MessageId(current);
        current -= 1;
        if Some(id) == status {
            continue;
        }
        match transport.remove_message(chat_id, id).await {
            Ok(()) => {
                deleted += 1;
                failures = 0;
                if deleted % CLEAR_STATUS_EVERY == 0 {
                    if let Some(status) = status {
                        let _ = transport
                            .replace_text(chat_id, status, &format!("Deleted messages: {}...", deleted))
                            .await;
                    }
                }
                if !limits.pause.is_zero() {
                    tokio::time::sleep(limits.pause).await;
                }
            }
            Err(_) => failures += 1,
        }
    }
    deleted
}
