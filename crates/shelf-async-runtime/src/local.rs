//! A one-book library backed by a local file
//!
//! Progress is kept next to the book in `<file>.progress.json`.

use async_trait::async_trait;
use shelf_reader::{
    AuthContext, BookFormat, BookRecord, LibraryApi, ProgressSnapshot, ReaderError, Result,
};
use std::path::{Path, PathBuf};

pub struct LocalLibrary {
    path: PathBuf,
    sidecar: PathBuf,
    format: BookFormat,
}

impl LocalLibrary {
    /// Id reported for the single book
    pub const BOOK_ID: u64 = 1;

    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = BookFormat::from_path(&path)
            .ok_or_else(|| ReaderError::UnsupportedFormat(path.display().to_string()))?;

        let mut sidecar = path.clone().into_os_string();
        sidecar.push(".progress.json");

        Ok(Self {
            path,
            sidecar: PathBuf::from(sidecar),
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    /// Last saved progress, or `None` if nothing was saved yet
    pub async fn load_progress(&self) -> Result<Option<ProgressSnapshot>> {
        let bytes = match tokio::fs::read(&self.sidecar).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            ReaderError::Config(format!(
                "Failed to parse {}: {}",
                self.sidecar.display(),
                e
            ))
        })?;
        Ok(Some(snapshot))
    }

    /// Book record with the saved progress applied
    pub async fn record(&self) -> Result<BookRecord> {
        let progress = self.load_progress().await?.unwrap_or(ProgressSnapshot {
            current_page: 0,
            progress_percentage: 0.0,
        });
        let title = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(BookRecord {
            id: Self::BOOK_ID,
            title,
            format: self.format,
            file_url: self.path.display().to_string(),
            current_page: progress.current_page,
            progress_percentage: progress.progress_percentage,
        })
    }

    fn check_id(&self, book_id: u64) -> Result<()> {
        if book_id == Self::BOOK_ID {
            Ok(())
        } else {
            Err(ReaderError::Http(format!("book {} not found", book_id)))
        }
    }
}

#[async_trait]
impl LibraryApi for LocalLibrary {
    async fn get_book(&self, book_id: u64, _auth: &AuthContext) -> Result<BookRecord> {
        self.check_id(book_id)?;
        self.record().await
    }

    async fn fetch_book_bytes(&self, book_id: u64, _auth: &AuthContext) -> Result<Vec<u8>> {
        self.check_id(book_id)?;
        Ok(tokio::fs::read(&self.path).await?)
    }

    async fn save_progress(
        &self,
        book_id: u64,
        _auth: &AuthContext,
        snapshot: ProgressSnapshot,
    ) -> Result<()> {
        self.check_id(book_id)?;
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ReaderError::Config(format!("Failed to serialize progress: {}", e)))?;
        tokio::fs::write(&self.sidecar, json).await?;
        Ok(())
    }
}
