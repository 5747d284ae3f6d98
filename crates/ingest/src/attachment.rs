//! Attachments and the staging-file guard.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Where an attachment's bytes live.
#[derive(Debug)]
pub enum AttachmentSource {
    Bytes(Vec<u8>),
    Staged(StagedFile),
}

#[derive(Debug)]
pub struct Attachment {
    pub source: AttachmentSource,
    /// The caller's original filename; only its stem and extension are used.
    pub filename: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn from_bytes(bytes: Vec<u8>, filename: &str, mime_type: &str) -> Self {
        Self {
            source: AttachmentSource::Bytes(bytes),
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn staged(file: StagedFile, filename: &str, mime_type: &str) -> Self {
        Self {
            source: AttachmentSource::Staged(file),
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn staged_path(&self) -> Option<&Path> {
        match &self.source {
            AttachmentSource::Staged(file) => Some(file.path()),
            AttachmentSource::Bytes(_) => None,
        }
    }
}

/// Owns a file in the staging directory and removes it when dropped.
///
/// Dropping is the only way the file goes away, so it is removed exactly
/// once whichever way the submission ends.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Write `bytes` to `<dir>/<millis>-<name>`.
    pub async fn create(dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let name = base_name(original_name);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let mut attempt = 0u32;
        let (path, mut file) = loop {
            let candidate = if attempt == 0 {
                dir.join(format!("{millis}-{name}"))
            } else {
                dir.join(format!("{millis}-{attempt}-{name}"))
            };
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => break (candidate, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        // From here on the guard owns the file, so a failed write cleans up.
        let staged = Self { path };
        file.write_all(bytes).await?;
        file.flush().await?;
        debug!(path = %staged.path.display(), size = bytes.len(), "attachment staged");
        Ok(staged)
    }

    /// Take ownership of a file some other component already wrote.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staging file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "staging file already gone")
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
        }
    }
}

/// Last path component, with a fallback for names that have none.
fn base_name(original: &str) -> String {
    let name = original.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        "upload".to_string()
    } else {
        name.to_string()
    }
}
