use crate::types::*;
use async_trait::async_trait;

/// The library backend as seen by a reading session
///
/// Every call carries the reader's identity; implementations attach it the
/// way their transport expects.
#[async_trait]
pub trait LibraryApi: Send + Sync {
    async fn get_book(&self, book_id: u64, auth: &AuthContext) -> Result<BookRecord>;

    async fn fetch_book_bytes(&self, book_id: u64, auth: &AuthContext) -> Result<Vec<u8>>;

    async fn save_progress(
        &self,
        book_id: u64,
        auth: &AuthContext,
        snapshot: ProgressSnapshot,
    ) -> Result<()>;
}
