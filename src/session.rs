use super::*;

use chrono::{DateTime, Local};
use tokio::sync::OwnedMutexGuard;

/// What the next free-text message from a user means. Flow-scoped scratch
/// values travel inside the variant, so switching flows drops them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Awaiting {
    Idle,
    FolderName,
    Filename,
    TrimStart { duration: f64 },
    TrimEnd { duration: f64, start: f64 },
    Url,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TrimBounds {
    pub(crate) start: f64,
    pub(crate) end: f64,
}

/// A received video that has not been committed to a folder yet.
#[derive(Debug)]
pub(crate) struct PendingUpload {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    pub(crate) received_at: DateTime<Local>,
    pub(crate) trim: Option<TrimBounds>,
    pub(crate) folder: Option<String>,
}

impl PendingUpload {
    pub(crate) fn new(path: PathBuf, size: u64) -> Self {
        PendingUpload {
            path,
            size,
            received_at: Local::now(),
            trim: None,
            folder: None,
        }
    }

    pub(crate) fn extension(&self) -> String {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(video_extension)
            .unwrap_or_else(|| DEFAULT_VIDEO_EXTENSION.to_string())
    }

    pub(crate) fn default_filename(&self) -> String {
        format!(
            "video_{}.{}",
            self.received_at.format("%Y%m%d_%H%M%S"),
            self.extension()
        )
    }

    /// Drops the record and removes its temp file.
    pub(crate) fn discard(self) {
        if self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("failed to remove temp file {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Scratch data of the folder/file browsing menus; rebuilt on every render.
#[derive(Debug, Default)]
pub(crate) struct BrowseScratch {
    pub(crate) files: Option<IdentifierMap>,
    pub(crate) delete_folders: Option<FolderIdMap>,
}

#[derive(Debug)]
pub(crate) struct UserSession {
    awaiting: Awaiting,
    pending: Option<PendingUpload>,
    pub(crate) browse: BrowseScratch,
}

impl Default for UserSession {
    fn default() -> Self {
        UserSession {
            awaiting: Awaiting::Idle,
            pending: None,
            browse: BrowseScratch::default(),
        }
    }
}

impl UserSession {
    pub(crate) fn awaiting(&self) -> Awaiting {
        self.awaiting
    }

    pub(crate) fn set_awaiting(&mut self, next: Awaiting) {
        self.awaiting = next;
    }

    pub(crate) fn pending(&self) -> Option<&PendingUpload> {
        self.pending.as_ref()
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut PendingUpload> {
        self.pending.as_mut()
    }

    pub(crate) fn take_pending(&mut self) -> Option<PendingUpload> {
        self.pending.take()
    }

    /// Installs a new pending upload. Last write wins: an earlier upload is
    /// discarded with its temp file. Returns whether one was replaced.
    pub(crate) fn replace_pending(&mut self, upload: PendingUpload) -> bool {
        let previous = self.pending.replace(upload);
        match previous {
            Some(previous) => {
                previous.discard();
                true
            }
            None => false,
        }
    }

    pub(crate) fn discard_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.discard();
        }
    }

    /// Back to a fresh session: idle, no scratch, no pending upload on disk.
    pub(crate) fn reset(&mut self) {
        self.awaiting = Awaiting::Idle;
        self.browse = BrowseScratch::default();
        self.discard_pending();
    }

    pub(crate) fn is_clear(&self) -> bool {
        self.awaiting == Awaiting::Idle
            && self.pending.is_none()
            && self.browse.files.is_none()
            && self.browse.delete_folders.is_none()
    }
}

/// Owns every user's session. A handler keeps the user's guard for its whole
/// run, which serializes events of one user without blocking anyone else.
#[derive(Default)]
pub(crate) struct SessionManager {
    users: Mutex<HashMap<u64, Arc<Mutex<UserSession>>>>,
}

impl SessionManager {
    pub(crate) async fn get_or_create(&self, user_id: u64) -> Arc<Mutex<UserSession>> {
        let mut users = self.users.lock().await;
        users
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(UserSession::default())))
            .clone()
    }

    pub(crate) async fn lock(&self, user_id: u64) -> OwnedMutexGuard<UserSession> {
        self.get_or_create(user_id).await.lock_owned().await
    }

    pub(crate) async fn clear(&self, user_id: u64) {
        let session = self.users.lock().await.get(&user_id).cloned();
        if let Some(session) = session {
            session.lock().await.reset();
        }
    }
}
