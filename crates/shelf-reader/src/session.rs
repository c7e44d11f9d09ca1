//! Lifecycle of one opened document
//!
//! `Unopened -> Opening -> Ready -> Closed`, with `Failed` reachable from
//! `Opening`. Nothing leaves `Closed` or `Failed`; a new session is needed
//! to retry.

use crate::api::LibraryApi;
use crate::engine::{DocumentEngine, ErrorBudget, Readiness};
use crate::loader::EngineHandle;
use crate::locations::{LocationIndex, index_locations};
use crate::options::ReaderConfig;
use crate::types::*;
use crate::wait::BoundedWait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opening,
    Ready,
    Closed,
    Failed,
}

/// Where the container bytes come from
pub enum DocumentSource {
    Bytes(Vec<u8>),
    /// Fetched from the library backend with the reader's identity attached
    Library {
        book_id: u64,
        api: Arc<dyn LibraryApi>,
    },
}

/// Latest published location index; `None` until the first pass finishes
pub type IndexWatch = watch::Receiver<Option<Arc<LocationIndex>>>;

pub struct DocumentSession {
    id: DocumentId,
    adapter: EngineHandle,
    config: ReaderConfig,
    state: SessionState,
    engine: Option<Arc<dyn DocumentEngine>>,
    index_tx: Arc<watch::Sender<Option<Arc<LocationIndex>>>>,
    indexer: Option<JoinHandle<()>>,
}

impl DocumentSession {
    pub fn new(adapter: EngineHandle, config: ReaderConfig) -> Self {
        let (index_tx, _) = watch::channel(None);
        Self {
            id: DocumentId(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed)),
            adapter,
            config,
            state: SessionState::Unopened,
            engine: None,
            index_tx: Arc::new(index_tx),
            indexer: None,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn kind(&self) -> EngineKind {
        self.adapter.kind()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Fetch and parse the document, bounded by the engine's open timeout
    ///
    /// Opening an already-open session returns the existing engine.
    pub async fn open(
        &mut self,
        source: DocumentSource,
        auth: &AuthContext,
    ) -> Result<Arc<dyn DocumentEngine>> {
        match self.state {
            SessionState::Ready => return self.engine(),
            SessionState::Closed | SessionState::Failed => return Err(ReaderError::SessionClosed),
            SessionState::Unopened | SessionState::Opening => {}
        }

        self.state = SessionState::Opening;
        match self.open_engine(source, auth).await {
            Ok(engine) => {
                log::info!(
                    "Document {} ready: {} engine, {} units",
                    self.id.0,
                    engine.kind(),
                    engine.unit_count()
                );
                self.engine = Some(Arc::clone(&engine));
                self.state = SessionState::Ready;
                Ok(engine)
            }
            Err(e) => {
                log::error!("Failed to open document {}: {}", self.id.0, e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    async fn open_engine(
        &self,
        source: DocumentSource,
        auth: &AuthContext,
    ) -> Result<Arc<dyn DocumentEngine>> {
        let bytes = match source {
            DocumentSource::Bytes(bytes) => bytes,
            DocumentSource::Library { book_id, api } => api.fetch_book_bytes(book_id, auth).await?,
        };

        let timeout = match self.adapter.readiness() {
            Readiness::Resolves => self.config.open_timeout(),
            Readiness::Signals => self.config.open_fallback_timeout(),
        };
        let budget = Arc::new(ErrorBudget::new(self.config.max_parser_errors));
        let wait = BoundedWait::new(timeout, self.config.engine_poll_interval());

        let opened = wait
            .on(self.adapter.open(bytes, Arc::clone(&budget), &self.config))
            .await
            .map_err(|_| ReaderError::OpenTimeout(timeout))?;

        match opened {
            Err(e @ (ReaderError::Pdf(_) | ReaderError::Zip(_) | ReaderError::Xml(_))) => {
                Err(budget.corrupt(&e))
            }
            other => other,
        }
    }

    /// The open engine, or `SessionClosed` when the session is not `Ready`
    pub fn engine(&self) -> Result<Arc<dyn DocumentEngine>> {
        match (&self.engine, self.state) {
            (Some(engine), SessionState::Ready) => Ok(Arc::clone(engine)),
            _ => Err(ReaderError::SessionClosed),
        }
    }

    /// Pages for PDF; index slots for EPUB once indexed, spine items before that
    pub fn unit_count(&self) -> u32 {
        if let Some(index) = self.location_index() {
            return index.len() as u32;
        }
        self.engine.as_ref().map_or(0, |e| e.unit_count())
    }

    /// Start the background indexing pass at the configured density
    ///
    /// A no-op for engines without a location index. Calling it again
    /// restarts the pass.
    pub fn index_locations(&mut self) -> Result<()> {
        let config = self.config.clone();
        self.spawn_indexer(move |spine_len| config.index_target(spine_len))
    }

    /// Re-index at `units_per_spine_item`; the result replaces the current
    /// index only if it is denser
    pub fn reindex(&mut self, units_per_spine_item: usize) -> Result<()> {
        let min_units = self.config.index_min_units;
        self.spawn_indexer(move |spine_len| (spine_len * units_per_spine_item).max(min_units))
    }

    fn spawn_indexer(&mut self, target_for: impl FnOnce(usize) -> usize) -> Result<()> {
        let engine = self.engine()?;
        let Some(lengths) = engine.content_lengths() else {
            return Ok(());
        };
        let target = target_for(lengths.len());
        let threshold = self.config.index_rerun_threshold;
        let tx = Arc::clone(&self.index_tx);
        let id = self.id;

        if let Some(previous) = self.indexer.take() {
            previous.abort();
        }

        self.indexer = Some(tokio::spawn(async move {
            let started = Instant::now();
            let built =
                tokio::task::spawn_blocking(move || index_locations(&lengths, target, threshold))
                    .await;
            match built {
                Ok(index) => {
                    let slots = index.len();
                    let published = tx.send_if_modified(|current| {
                        if current.as_ref().is_some_and(|c| c.len() >= slots) {
                            return false;
                        }
                        *current = Some(Arc::new(index));
                        true
                    });
                    if published {
                        log::info!(
                            "Indexed document {}: {} locations in {:?}",
                            id.0,
                            slots,
                            started.elapsed()
                        );
                    }
                }
                Err(e) => log::warn!("Location indexing for document {} failed: {}", id.0, e),
            }
        }));
        Ok(())
    }

    pub fn location_index(&self) -> Option<Arc<LocationIndex>> {
        self.index_tx.borrow().clone()
    }

    pub fn index_watch(&self) -> IndexWatch {
        self.index_tx.subscribe()
    }

    /// Wait up to `timeout` for the first index to be published
    pub async fn wait_for_index(&self, timeout: Duration) -> Option<Arc<LocationIndex>> {
        let mut rx = self.index_tx.subscribe();
        let ready = tokio::time::timeout(timeout, rx.wait_for(|index| index.is_some())).await;
        match ready {
            Ok(Ok(index)) => index.clone(),
            _ => None,
        }
    }

    /// Stop indexing and release the engine. Idempotent.
    pub fn close(&mut self) {
        if let Some(indexer) = self.indexer.take() {
            indexer.abort();
        }
        if let Some(engine) = self.engine.take() {
            engine.close();
            log::debug!("Closed document {}", self.id.0);
        }
        if matches!(
            self.state,
            SessionState::Unopened | SessionState::Opening | SessionState::Ready
        ) {
            self.state = SessionState::Closed;
        }
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.close();
    }
}
