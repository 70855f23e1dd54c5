use super::*;

use sha2::{Digest, Sha256};

pub(crate) const MAX_CALLBACK_DATA_LEN: usize = 64;
pub(crate) const TOKEN_LEN: usize = 16;

/// Builds `prefix_arg1_arg2` with every character outside `[\w.-]` replaced by
/// `_`, cut to the callback payload limit. Lossy: distinct names may collide.
pub(crate) fn safe_callback_data(prefix: &str, args: &[&str]) -> String {
    let safe_args: Vec<String> = args
        .iter()
        .map(|arg| {
            arg.chars()
                .map(|c| {
                    if c.is_alphanumeric() || matches!(c, '_' | '.' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        })
        .collect();
    let data = format!("{}_{}", prefix, safe_args.join("_"));
    truncate_bytes(&data, MAX_CALLBACK_DATA_LEN)
}

/// Reverse lookup for [`safe_callback_data`]: the first candidate whose encoding
/// reproduces `data`.
pub(crate) fn match_safe_callback<'a>(
    prefix: &str,
    data: &str,
    candidates: &'a [String],
) -> Option<&'a String> {
    candidates
        .iter()
        .find(|candidate| safe_callback_data(prefix, &[candidate.as_str()]) == data)
}

pub(crate) fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn digest_token(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(TOKEN_LEN);
    token
}

pub(crate) fn file_token(folder: &str, file: &str) -> String {
    digest_token(&format!("{}/{}", folder, file))
}

pub(crate) fn folder_token(folder: &str) -> String {
    digest_token(folder)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileRef {
    pub(crate) folder: String,
    pub(crate) file: String,
}

/// Token -> (folder, file) table for one rendered file listing.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdentifierMap {
    folder: String,
    files: Vec<(String, FileRef)>,
}

impl IdentifierMap {
    pub(crate) fn build(folder: &str, files: &[String]) -> Self {
        let mut entries: Vec<(String, FileRef)> = Vec::with_capacity(files.len());
        for file in files {
            let token = file_token(folder, file);
            if entries.iter().any(|(existing, _)| existing == &token) {
                continue;
            }
            entries.push((
                token,
                FileRef {
                    folder: folder.to_string(),
                    file: file.clone(),
                },
            ));
        }
        IdentifierMap {
            folder: folder.to_string(),
            files: entries,
        }
    }

    pub(crate) fn folder(&self) -> &str {
        &self.folder
    }

    pub(crate) fn resolve(&self, token: &str) -> Option<&FileRef> {
        self.files
            .iter()
            .find(|(candidate, _)| candidate == token)
            .map(|(_, file_ref)| file_ref)
    }

    /// Entries in listing order.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &FileRef)> {
        self.files
            .iter()
            .map(|(token, file_ref)| (token.as_str(), file_ref))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Token -> folder table for the delete-video folder picker.
#[derive(Clone, Debug, Default)]
pub(crate) struct FolderIdMap {
    folders: Vec<(String, String)>,
}

impl FolderIdMap {
    pub(crate) fn build(folders: &[String]) -> Self {
        let folders = folders
            .iter()
            .map(|folder| (folder_token(folder), folder.clone()))
            .collect();
        FolderIdMap { folders }
    }

    pub(crate) fn resolve(&self, token: &str) -> Option<&str> {
        self.folders
            .iter()
            .find(|(candidate, _)| candidate == token)
            .map(|(_, folder)| folder.as_str())
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.folders
            .iter()
            .map(|(token, folder)| (token.as_str(), folder.as_str()))
    }
}

#[cfg(test)]
mod ids_tests {
    use super::*;

    #[test]
    fn safe_callback_data_replaces_unsafe_chars() {
        assert_eq!(safe_callback_data("save", &["my trips/2024"]), "save_my_trips_2024");
        assert_eq!(safe_callback_data("view", &["clips.v2-final"]), "view_clips.v2-final");
    }

    #[test]
    fn safe_callback_data_respects_payload_limit_on_char_boundary() {
        let long_name = "видео".repeat(20);
        let data = safe_callback_data("save", &[&long_name]);
        assert!(data.len() <= MAX_CALLBACK_DATA_LEN);
        assert!(data.starts_with("save_"));
        assert!(std::str::from_utf8(data.as_bytes()).is_ok());
    }

    #[test]
    fn match_safe_callback_finds_listed_folder() {
        let folders = vec!["a b".to_string(), "trips".to_string()];
        let data = safe_callback_data("save", &["a b"]);
        assert_eq!(match_safe_callback("save", &data, &folders), Some(&folders[0]));
        assert_eq!(match_safe_callback("save", "save_missing", &folders), None);
    }

    #[test]
    fn file_tokens_are_deterministic_and_short() {
        let first = file_token("clips", "a.mp4");
        let second = file_token("clips", "a.mp4");
        assert_eq!(first, second);
        assert_eq!(first.len(), TOKEN_LEN);
        assert_ne!(first, file_token("clips", "b.mp4"));
        assert_ne!(first, file_token("other", "a.mp4"));
    }

    #[test]
    fn identifier_map_round_trips_every_entry() {
        let files = vec!["a.mp4".to_string(), "b.mov".to_string(), "c d.avi".to_string()];
        let map = IdentifierMap::build("clips", &files);
        for file in &files {
            let token = file_token("clips", file);
            let resolved = map.resolve(&token).unwrap();
            assert_eq!(resolved.folder, "clips");
            assert_eq!(&resolved.file, file);
        }
        assert!(map.resolve("0000000000000000").is_none());
    }

    #[test]
    fn folder_id_map_resolves_tokens() {
        let folders = vec!["one".to_string(), "two".to_string()];
        let map = FolderIdMap::build(&folders);
        assert_eq!(map.resolve(&folder_token("two")), Some("two"));
        assert_eq!(map.resolve("nope"), None);
    }
}
