use admute_common::frame::Frame;
use admute_common::label::Label;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create archive directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write frame {0}: {1}")]
    Write(String, std::io::Error),
}

/// Keeps classified frames on disk, one file per frame, grouped by date.
/// The label is part of the file name so misclassifications are easy to find.
pub struct FrameArchive {
    dir: PathBuf,
}

impl FrameArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn store(&self, frame: &Frame, label: Label) -> Result<PathBuf, ArchiveError> {
        let path = self.dir.join(frame.archive_key("", label));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArchiveError::CreateDir(parent.display().to_string(), e))?;
        }
        tokio::fs::write(&path, &frame.jpeg)
            .await
            .map_err(|e| ArchiveError::Write(path.display().to_string(), e))?;
        debug!(path = path.display().to_string(), bytes = frame.len(), "frame archived");
        Ok(path)
    }
}
