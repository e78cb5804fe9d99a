//! Media uploads shared inside a chat.
//!
//! Files land in the uploads directory under a fresh name and are removed
//! when their owner ends the chat or disconnects. Files with no live owner
//! share one pool capped at [`ANONYMOUS_UPLOAD_CAP`], oldest out first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ServerError;

/// Owner used when the request carries no `user-id` header.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Anonymous uploads kept on disk before the oldest are removed.
pub const ANONYMOUS_UPLOAD_CAP: usize = 64;

static ALLOWED_TYPES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"jpeg|jpg|png|gif|mp4|webm|ogg|mp3|wav|m4a").unwrap());

/// JSON body returned by a successful upload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub originalname: String,
    pub mimetype: String,
    pub size: usize,
    pub url: String,
}

/// Lowercased extension including the dot, or empty.
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Both the extension and the declared mimetype must name an allowed format.
pub fn is_allowed(original_name: &str, mimetype: &str) -> bool {
    ALLOWED_TYPES.is_match(&extension_of(original_name)) && ALLOWED_TYPES.is_match(mimetype)
}

/// Validate and write one uploaded file. Returns the path written and the response body.
pub async fn store(
    uploads_dir: &Path,
    original_name: &str,
    mimetype: &str,
    bytes: &[u8],
    limit: usize,
) -> Result<(PathBuf, UploadResponse), ServerError> {
    if !is_allowed(original_name, mimetype) {
        return Err(ServerError::InvalidFileType(format!("{original_name} ({mimetype})")));
    }
    if bytes.len() > limit {
        return Err(ServerError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }

    let filename = format!("{}{}", Uuid::now_v7(), extension_of(original_name));
    let path = uploads_dir.join(&filename);
    tokio::fs::write(&path, bytes).await?;

    let response = UploadResponse {
        url: format!("/uploads/{filename}"),
        filename,
        originalname: original_name.to_string(),
        mimetype: mimetype.to_string(),
        size: bytes.len(),
    };
    Ok((path, response))
}

/// Files written per owner, so they can be removed when the owner leaves.
#[derive(Debug, Default)]
pub struct UploadTracker {
    files: HashMap<String, Vec<PathBuf>>,
}

impl UploadTracker {
    pub fn track(&mut self, owner: &str, path: PathBuf) {
        self.files.entry(owner.to_string()).or_default().push(path);
    }

    /// Track a file with no live owner. Returns how many older anonymous
    /// files were evicted to stay under the cap.
    pub fn track_anonymous(&mut self, path: PathBuf) -> usize {
        let pool = self.files.entry(ANONYMOUS_OWNER.to_string()).or_default();
        pool.push(path);
        let excess = pool.len().saturating_sub(ANONYMOUS_UPLOAD_CAP);
        let evicted: Vec<PathBuf> = pool.drain(..excess).collect();
        remove_in_background(evicted);
        excess
    }

    pub fn take(&mut self, owner: &str) -> Vec<PathBuf> {
        self.files.remove(owner).unwrap_or_default()
    }

    pub fn tracked(&self, owner: &str) -> usize {
        self.files.get(owner).map_or(0, Vec::len)
    }

    /// Take every file owned by `owner` and delete them in the background.
    pub fn purge(&mut self, owner: &str) -> usize {
        let paths = self.take(owner);
        let count = paths.len();
        remove_in_background(paths);
        count
    }
}

fn remove_in_background(paths: Vec<PathBuf>) {
    for path in paths {
        tokio::spawn(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "removed upload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove upload"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_types() {
        assert!(is_allowed("cat.png", "image/png"));
        assert!(is_allowed("clip.WEBM", "video/webm"));
        assert!(is_allowed("note.ogg", "audio/ogg"));
        assert!(!is_allowed("evil.exe", "application/octet-stream"));
        assert!(!is_allowed("disguised.png", "application/x-msdownload"));
        assert!(!is_allowed("noext", "image/png"));
    }

    #[test]
    fn extension_keeps_dot() {
        assert_eq!(extension_of("a.JPG"), ".jpg");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("plain"), "");
    }

    #[tokio::test]
    async fn store_writes_file_under_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let (path, response) = store(dir.path(), "cat.png", "image/png", b"png-bytes", 1024)
            .await
            .unwrap();

        assert!(response.filename.ends_with(".png"));
        assert_ne!(response.filename, "cat.png");
        assert_eq!(response.url, format!("/uploads/{}", response.filename));
        assert_eq!(response.size, 9);
        assert_eq!(response.originalname, "cat.png");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn store_rejects_bad_type_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path(), "x.exe", "application/x-msdownload", b"mz", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidFileType(_)));

        let err = store(dir.path(), "big.png", "image/png", &[0u8; 16], 8)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::TooLarge { size: 16, limit: 8 }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn purge_removes_owned_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let mine = dir.path().join("mine.png");
        let theirs = dir.path().join("theirs.png");
        std::fs::write(&mine, b"1").unwrap();
        std::fs::write(&theirs, b"2").unwrap();

        let mut tracker = UploadTracker::default();
        tracker.track("me", mine.clone());
        tracker.track("them", theirs.clone());
        assert_eq!(tracker.tracked("me"), 1);

        assert_eq!(tracker.purge("me"), 1);
        assert_eq!(tracker.tracked("me"), 0);
        assert_eq!(tracker.purge("me"), 0);

        for _ in 0..50 {
            if !mine.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!mine.exists());
        assert!(theirs.exists());
    }

    #[tokio::test]
    async fn anonymous_pool_evicts_oldest_past_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = UploadTracker::default();
        let paths: Vec<PathBuf> = (0..=ANONYMOUS_UPLOAD_CAP)
            .map(|i| {
                let path = dir.path().join(format!("{i}.png"));
                std::fs::write(&path, b"x").unwrap();
                path
            })
            .collect();

        let mut evicted = 0;
        for path in &paths {
            evicted += tracker.track_anonymous(path.clone());
        }
        assert_eq!(evicted, 1);
        assert_eq!(tracker.tracked(ANONYMOUS_OWNER), ANONYMOUS_UPLOAD_CAP);

        let oldest = &paths[0];
        for _ in 0..50 {
            if !oldest.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!oldest.exists());
        assert!(paths[ANONYMOUS_UPLOAD_CAP].exists());
        assert!(paths[1].exists());
    }
}
