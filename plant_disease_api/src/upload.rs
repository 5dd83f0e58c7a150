use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

const FALLBACK_FILENAME: &str = "upload";

// Room for the random part `tempfile` inserts while staying under NAME_MAX.
const MAX_STEM_BYTES: usize = 200;
const MAX_EXTENSION_BYTES: usize = 16;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to create upload directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to save upload: {0}")]
    Write(#[from] std::io::Error),
}

/// True when the text after the last `.` is an accepted image extension.
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Reduces a client supplied filename to a flat ASCII name safe to join onto
/// the upload directory. Non-ASCII characters are dropped, not transliterated.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| UploadError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` to a fresh file named after `filename`. Concurrent
    /// uploads of the same name get distinct files.
    pub fn persist(&self, filename: &str, bytes: &[u8]) -> Result<TempUpload, UploadError> {
        let sanitized = secure_filename(filename);
        let (stem, ext) = match sanitized.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (sanitized.as_str(), None),
        };
        // `secure_filename` output is ASCII, so byte offsets are char boundaries.
        let stem = &stem[..stem.len().min(MAX_STEM_BYTES)];
        let suffix = ext
            .map(|ext| format!(".{}", &ext[..ext.len().min(MAX_EXTENSION_BYTES)]))
            .unwrap_or_default();

        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", stem))
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        file.write_all(bytes)?;
        file.flush()?;

        tracing::debug!("Saved upload {:?} to {:?}", filename, file.path());

        Ok(TempUpload { file })
    }
}

/// An uploaded file on disk. The file is removed when this value is dropped,
/// whichever way the request ends.
#[derive(Debug)]
pub struct TempUpload {
    file: NamedTempFile,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn close(self) -> std::io::Result<()> {
        self.file.close()
    }
}
