//! Library backend over HTTP
//!
//! Blocking `ureq` calls run on the blocking pool. Every request carries the
//! caller-identity header when the reader is authenticated.

use async_trait::async_trait;
use shelf_reader::{AuthContext, BookRecord, LibraryApi, ProgressSnapshot, ReaderError, Result};
use std::io::Read;

pub struct HttpLibrary {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpLibrary {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent: ureq::agent(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn book_url(&self, book_id: u64) -> String {
        format!("{}/api/v1/books/{}", self.base_url, book_id)
    }

    fn download_url(&self, book_id: u64) -> String {
        format!("{}/download", self.book_url(book_id))
    }

    fn progress_url(&self, book_id: u64) -> String {
        format!("{}/progress", self.book_url(book_id))
    }
}

fn with_identity(request: ureq::Request, auth: &AuthContext) -> ureq::Request {
    match auth.header() {
        Some((name, value)) => request.set(name, &value),
        None => request,
    }
}

fn http_error(url: &str, error: ureq::Error) -> ReaderError {
    match error {
        ureq::Error::Status(code, response) => {
            ReaderError::Http(format!("{} returned {} {}", url, code, response.status_text()))
        }
        ureq::Error::Transport(transport) => {
            ReaderError::Http(format!("{} unreachable: {}", url, transport))
        }
    }
}

#[async_trait]
impl LibraryApi for HttpLibrary {
    async fn get_book(&self, book_id: u64, auth: &AuthContext) -> Result<BookRecord> {
        let agent = self.agent.clone();
        let url = self.book_url(book_id);
        let auth = *auth;

        let mut record = tokio::task::spawn_blocking(move || -> Result<BookRecord> {
            let response = with_identity(agent.get(&url), &auth)
                .call()
                .map_err(|e| http_error(&url, e))?;
            let body = response.into_string()?;
            serde_json::from_str::<BookRecord>(&body)
                .map_err(|e| ReaderError::Http(format!("Invalid book record from {}: {}", url, e)))
        })
        .await??;

        if record.file_url.is_empty() {
            record.file_url = self.download_url(book_id);
        }
        Ok(record)
    }

    async fn fetch_book_bytes(&self, book_id: u64, auth: &AuthContext) -> Result<Vec<u8>> {
        let agent = self.agent.clone();
        let url = self.download_url(book_id);
        let auth = *auth;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let response = with_identity(agent.get(&url), &auth)
                .call()
                .map_err(|e| http_error(&url, e))?;
            let mut bytes = Vec::new();
            response.into_reader().read_to_end(&mut bytes)?;
            log::debug!("Downloaded {} bytes from {}", bytes.len(), url);
            Ok(bytes)
        })
        .await?
    }

    async fn save_progress(
        &self,
        book_id: u64,
        auth: &AuthContext,
        snapshot: ProgressSnapshot,
    ) -> Result<()> {
        let agent = self.agent.clone();
        let url = self.progress_url(book_id);
        let auth = *auth;
        let body = serde_json::to_string(&snapshot)
            .map_err(|e| ReaderError::Http(format!("Failed to encode progress: {}", e)))?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            with_identity(agent.put(&url), &auth)
                .set("Content-Type", "application/json")
                .send_string(&body)
                .map_err(|e| http_error(&url, e))?;
            Ok(())
        })
        .await?
    }
}
