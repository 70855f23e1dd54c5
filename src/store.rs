use super::*;

pub(crate) const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];
pub(crate) const DEFAULT_VIDEO_EXTENSION: &str = "mp4";
const MAX_SEGMENT_BYTES: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct VideoFile {
    pub(crate) name: String,
    pub(crate) size: u64,
}

/// Returned by [`ResourceStore::commit`] when the move fails; the pending
/// upload comes back untouched so the caller decides about its temp file.
#[derive(Debug)]
pub(crate) struct CommitError {
    pub(crate) error: StoreError,
    pub(crate) pending: PendingUpload,
}

/// Flat folder namespace of videos under one root directory. The store is the
/// only writer of that tree; temp files live in a hidden directory beside the
/// folders so a commit is a same-filesystem rename.
#[derive(Clone, Debug)]
pub(crate) struct ResourceStore {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl ResourceStore {
    pub(crate) fn open(root: &Path, temp_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root)
            .map_err(|e| StoreError::io(format!("create root {}", root.display()), e))?;
        fs::create_dir_all(temp_dir)
            .map_err(|e| StoreError::io(format!("create temp dir {}", temp_dir.display()), e))?;
        Ok(ResourceStore {
            root: root.to_path_buf(),
            temp_dir: temp_dir.to_path_buf(),
        })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Creates the folder if missing and returns the sanitized name used on disk.
    pub(crate) fn create_folder(&self, name: &str) -> Result<String, StoreError> {
        let folder = sanitize_segment(name)?;
        let path = self.root.join(&folder);
        if path.exists() && !path.is_dir() {
            return Err(StoreError::AlreadyExists(folder));
        }
        fs::create_dir_all(&path)
            .map_err(|e| StoreError::io(format!("create folder {}", path.display()), e))?;
        info!("folder ready: {}", folder);
        Ok(folder)
    }

    pub(crate) fn list_folders(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::io(format!("read dir {}", self.root.display()), e))?;
        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| StoreError::io(format!("read dir entry {}", self.root.display()), e))?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };
            if name.starts_with('.') || self.root.join(&name) == self.temp_dir {
                continue;
            }
            folders.push(name);
        }
        folders.sort();
        Ok(folders)
    }

    pub(crate) fn folder_exists(&self, name: &str) -> bool {
        match self.folder_path(name) {
            Ok(path) => path.is_dir(),
            Err(_) => false,
        }
    }

    pub(crate) fn list_videos(&self, folder: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_video_files(folder)?
            .into_iter()
            .map(|video| video.name)
            .collect())
    }

    pub(crate) fn list_video_files(&self, folder: &str) -> Result<Vec<VideoFile>, StoreError> {
        let dir = self.existing_folder(folder)?;
        let entries = fs::read_dir(&dir)
            .map_err(|e| StoreError::io(format!("read dir {}", dir.display()), e))?;
        let mut videos = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| StoreError::io(format!("read dir entry {}", dir.display()), e))?;
            let path = entry.path();
            if !path.is_file() || !has_video_extension(&path) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            videos.push(VideoFile { name, size });
        }
        videos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(videos)
    }

    /// Removes the folder with everything in it; returns how many videos it held.
    pub(crate) fn delete_folder(&self, name: &str) -> Result<usize, StoreError> {
        let dir = self.existing_folder(name)?;
        let count = self.list_videos(name)?.len();
        fs::remove_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("remove folder {}", dir.display()), e))?;
        info!("folder deleted: {} ({} videos)", name, count);
        Ok(count)
    }

    pub(crate) fn delete_video(&self, folder: &str, name: &str) -> Result<(), StoreError> {
        let path = self.video_path(folder, name)?;
        fs::remove_file(&path)
            .map_err(|e| StoreError::io(format!("remove video {}", path.display()), e))?;
        info!("video deleted: {}/{}", folder, name);
        Ok(())
    }

    pub(crate) fn video_path(&self, folder: &str, name: &str) -> Result<PathBuf, StoreError> {
        let dir = self.existing_folder(folder)?;
        let file = check_segment(name)?;
        let path = dir.join(file);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!("{}/{}", folder, name)));
        }
        Ok(path)
    }

    /// Sessions do not survive a restart, so anything left in the temp dir is
    /// an orphan.
    pub(crate) fn purge_temp(&self) -> Result<usize, StoreError> {
        let entries = fs::read_dir(&self.temp_dir)
            .map_err(|e| StoreError::io(format!("read dir {}", self.temp_dir.display()), e))?;
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let outcome = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match outcome {
                Ok(()) => removed += 1,
                Err(err) => warn!("failed to remove stale temp entry {}: {}", path.display(), err),
            }
        }
        Ok(removed)
    }

    pub(crate) fn new_temp_path(&self, extension: &str) -> PathBuf {
        self.temp_dir
            .join(format!("temp_{}.{}", Uuid::new_v4().simple(), extension))
    }

    /// Moves the pending upload's temp file into `folder` as `filename`.
    pub(crate) fn commit(
        &self,
        pending: PendingUpload,
        folder: &str,
        filename: &str,
    ) -> Result<VideoFile, CommitError> {
        match self.commit_path(&pending.path, folder, filename) {
            Ok(name) => {
                info!("video committed: {}/{} ({} bytes)", folder, name, pending.size);
                Ok(VideoFile {
                    name,
                    size: pending.size,
                })
            }
            Err(error) => Err(CommitError { error, pending }),
        }
    }

    fn commit_path(&self, source: &Path, folder: &str, filename: &str) -> Result<String, StoreError> {
        let dir = self.existing_folder(folder)?;
        let name = sanitize_segment(filename)?;
        let target = dir.join(&name);
        if target.exists() {
            return Err(StoreError::AlreadyExists(name));
        }
        if !source.is_file() {
            return Err(StoreError::NotFound(source.display().to_string()));
        }
        if fs::rename(source, &target).is_err() {
            // Cross-device temp dirs cannot be renamed into place.
            fs::copy(source, &target)
                .map_err(|e| StoreError::io(format!("copy into {}", target.display()), e))?;
            if let Err(err) = fs::remove_file(source) {
                warn!("temp file left behind {}: {}", source.display(), err);
            }
        }
        Ok(name)
    }

    fn folder_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let folder = check_segment(name)?;
        Ok(self.root.join(folder))
    }

    fn existing_folder(&self, name: &str) -> Result<PathBuf, StoreError> {
        let path = self.folder_path(name)?;
        if !path.is_dir() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

/// Turns user input into a single safe path segment.
pub(crate) fn sanitize_segment(input: &str) -> Result<String, StoreError> {
    let first_line = input.trim().lines().next().unwrap_or("").trim();
    let replaced: String = first_line
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    let name = truncate_bytes(trimmed, MAX_SEGMENT_BYTES);
    if name.is_empty() || name.starts_with('.') {
        return Err(StoreError::InvalidName(input.trim().to_string()));
    }
    Ok(name)
}

/// Accepts names that are already safe segments; used for lookups so a
/// lookup never silently resolves to a different entry.
fn check_segment(name: &str) -> Result<&str, StoreError> {
    match sanitize_segment(name) {
        Ok(clean) if clean == name => Ok(name),
        _ => Err(StoreError::InvalidName(name.to_string())),
    }
}

pub(crate) fn video_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

pub(crate) fn has_video_extension(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(video_extension)
        .is_some()
}

/// Gives a sanitized name the extension of the file it will hold. A typed
/// video extension for another format is replaced, and the stem is shortened
/// so the result still fits in one segment.
pub(crate) fn fit_video_filename(name: &str, ext: &str) -> String {
    let stem = match video_extension(name) {
        Some(typed) if typed.eq_ignore_ascii_case(ext) => return name.to_string(),
        Some(_) => Path::new(name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(name),
        None => name,
    };
    let budget = MAX_SEGMENT_BYTES.saturating_sub(ext.len() + 1);
    format!("{}.{}", truncate_bytes(stem, budget), ext)
}
