//! One open book: engine, session, navigation, persistence, and outline
//!
//! The shell owns the document session for its whole life. Teardown cancels
//! in-flight navigation, drops the pending progress save, and closes the
//! document, on every exit path.

use crate::ReaderUpdate;
use shelf_reader::translator::percentage_to_location;
use shelf_reader::{
    AuthContext, BookRecord, DocumentEngine, DocumentId, DocumentSession, DocumentSource,
    EngineKind, EngineLoader, LibraryApi, LocationToken, NavOutcome, NavTarget,
    NavigationController, OutlineResolver, Position, ProgressObserver, ProgressPersister,
    ReaderConfig, ReaderError, ResolvedEntry, Result, Settled,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What to open and as whom
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub book: BookRecord,
    pub auth: AuthContext,
    /// Exact EPUB location saved by an earlier session; preferred over the percentage
    pub location: Option<LocationToken>,
}

impl OpenRequest {
    pub fn new(book: BookRecord, auth: AuthContext) -> Self {
        Self {
            book,
            auth,
            location: None,
        }
    }
}

/// Forwards settled navigations to the persister and the host
struct ShellObserver {
    persister: Arc<ProgressPersister>,
    updates: mpsc::UnboundedSender<ReaderUpdate>,
}

impl ProgressObserver for ShellObserver {
    fn on_settled(&self, settled: &Settled) {
        self.persister.on_settled(settled);

        let _ = self.updates.send(ReaderUpdate::PageRendered {
            position: settled.position.clone(),
            summary: settled.view.label.clone(),
        });
        let _ = self.updates.send(ReaderUpdate::ProgressChanged {
            percentage: settled.snapshot.progress_percentage,
        });
        if let Position::Location(token) = &settled.position {
            let _ = self.updates.send(ReaderUpdate::LocationChanged {
                token: token.clone(),
                fraction: settled.fraction,
            });
        }
    }
}

pub struct ViewerShell {
    book_id: u64,
    session: DocumentSession,
    navigator: Arc<NavigationController>,
    persister: Arc<ProgressPersister>,
    outline: Vec<ResolvedEntry>,
    updates: mpsc::UnboundedSender<ReaderUpdate>,
    densify_rx: Option<mpsc::UnboundedReceiver<usize>>,
    closed: bool,
}

impl ViewerShell {
    /// Load the engine, open the book, and display the resume position
    ///
    /// Sends `Ready` on success. On failure sends `Error` and releases
    /// everything that was acquired.
    pub async fn open(
        loader: &EngineLoader,
        api: Arc<dyn LibraryApi>,
        request: OpenRequest,
        config: &ReaderConfig,
        updates: mpsc::UnboundedSender<ReaderUpdate>,
    ) -> Result<Self> {
        let book_id = request.book.id;
        match Self::start(loader, api, request, config, updates.clone()).await {
            Ok(shell) => Ok(shell),
            Err(e) => {
                log::error!("Failed to open book {}: {}", book_id, e);
                let _ = updates.send(ReaderUpdate::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn start(
        loader: &EngineLoader,
        api: Arc<dyn LibraryApi>,
        request: OpenRequest,
        config: &ReaderConfig,
        updates: mpsc::UnboundedSender<ReaderUpdate>,
    ) -> Result<Self> {
        let OpenRequest {
            book,
            auth,
            location,
        } = request;

        let adapter = loader.ensure_for(book.format).await?;
        let mut session = DocumentSession::new(adapter, config.clone());
        let source = DocumentSource::Library {
            book_id: book.id,
            api: Arc::clone(&api),
        };
        let engine = session.open(source, &auth).await?;
        session.index_locations()?;

        let persister = Arc::new(ProgressPersister::spawn(
            book.id,
            auth,
            api,
            config.debounce(),
        ));
        let observer = Arc::new(ShellObserver {
            persister: Arc::clone(&persister),
            updates: updates.clone(),
        });
        let (densify_tx, densify_rx) = mpsc::unbounded_channel();
        let navigator = Arc::new(
            NavigationController::new(Arc::clone(&engine), session.index_watch(), observer)
                .with_densify_requests(densify_tx),
        );
        let outline = OutlineResolver::new(Arc::clone(&engine)).resolve_all();

        // Dropping the shell from here on tears everything down
        let shell = Self {
            book_id: book.id,
            session,
            navigator,
            persister,
            outline,
            updates,
            densify_rx: Some(densify_rx),
            closed: false,
        };

        let initial = shell.initial_position(&engine, &book, location, config).await;
        shell.display_initial(&engine, initial).await?;

        log::info!(
            "Opened '{}' ({}) at {}",
            book.title,
            book.format,
            shell.navigator.current()
        );
        let _ = shell.updates.send(ReaderUpdate::Ready {
            doc_id: shell.session.id(),
            total_units: shell.session.unit_count(),
            outline: shell.outline.clone(),
        });
        Ok(shell)
    }

    /// Where a returning reader left off, or `None` for the book's start
    async fn initial_position(
        &self,
        engine: &Arc<dyn DocumentEngine>,
        book: &BookRecord,
        location: Option<LocationToken>,
        config: &ReaderConfig,
    ) -> Option<Position> {
        match engine.kind() {
            EngineKind::Pdf => {
                let page = book.current_page.max(1).min(engine.unit_count());
                engine.locate(&NavTarget::Page(page))
            }
            EngineKind::Epub => {
                if let Some(position) =
                    location.and_then(|token| engine.locate(&NavTarget::Location(token)))
                {
                    return Some(position);
                }

                // Boundary percentages open at the start; no index needed
                let percentage = book.progress_percentage;
                if !(percentage > 0.0 && percentage < 100.0) {
                    return None;
                }

                let index = self.session.wait_for_index(config.resume_index_wait()).await;
                if index.is_none() {
                    log::warn!(
                        "Location index for book {} not ready in {:?}; opening at the start",
                        book.id,
                        config.resume_index_wait()
                    );
                }
                let token = percentage_to_location(percentage, index.as_deref())?;
                engine.locate(&NavTarget::Location(token))
            }
        }
    }

    /// Display the resume position, retrying once at the start if it fails
    async fn display_initial(
        &self,
        engine: &Arc<dyn DocumentEngine>,
        initial: Option<Position>,
    ) -> Result<()> {
        let start = engine.start_position();
        let position = initial.unwrap_or_else(|| start.clone());

        match self.navigator.display(position.clone()).await {
            Ok(_) => Ok(()),
            Err(e) if position != start => {
                log::warn!("Could not display {}: {}; falling back to the start", position, e);
                self.navigator.display(start).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    pub fn book_id(&self) -> u64 {
        self.book_id
    }

    pub fn doc_id(&self) -> DocumentId {
        self.session.id()
    }

    pub fn navigator(&self) -> &Arc<NavigationController> {
        &self.navigator
    }

    /// Resolved outline, in the order sent with `Ready`
    pub fn outline(&self) -> &[ResolvedEntry] {
        &self.outline
    }

    pub fn unit_count(&self) -> u32 {
        self.session.unit_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Densify requests raised by the navigator; can be taken once
    pub fn take_densify_requests(&mut self) -> Option<mpsc::UnboundedReceiver<usize>> {
        self.densify_rx.take()
    }

    pub fn reindex(&mut self, units_per_spine_item: usize) {
        if let Err(e) = self.session.reindex(units_per_spine_item) {
            log::debug!("Book {}: re-index skipped: {}", self.book_id, e);
        }
    }

    pub fn next(&self) -> JoinHandle<()> {
        self.spawn_navigation(|nav| async move { nav.next().await })
    }

    pub fn prev(&self) -> JoinHandle<()> {
        self.spawn_navigation(|nav| async move { nav.prev().await })
    }

    pub fn go_to(&self, target: NavTarget) -> JoinHandle<()> {
        self.spawn_navigation(|nav| async move { nav.go_to(target).await })
    }

    /// Navigate to entry `index` of the resolved outline
    pub fn jump_to_chapter(&self, index: usize) -> Result<JoinHandle<()>> {
        let entry = self.outline.get(index).ok_or_else(|| {
            ReaderError::OutlineResolutionFailed(format!(
                "outline has {} entries, no entry {}",
                self.outline.len(),
                index
            ))
        })?;
        log::debug!("Book {}: jumping to '{}'", self.book_id, entry.title);
        Ok(self.go_to(entry.target.clone()))
    }

    /// Each navigation runs as its own task so a newer request never waits
    /// behind an older render
    fn spawn_navigation<F, Fut>(&self, navigate: F) -> JoinHandle<()>
    where
        F: FnOnce(Arc<NavigationController>) -> Fut,
        Fut: Future<Output = Result<NavOutcome>> + Send + 'static,
    {
        let pending = navigate(Arc::clone(&self.navigator));
        let updates = self.updates.clone();
        let book_id = self.book_id;

        tokio::spawn(async move {
            match pending.await {
                Ok(NavOutcome::Superseded) => {
                    log::debug!("Book {}: navigation superseded", book_id)
                }
                Ok(_) => {}
                Err(ReaderError::SessionClosed) => {
                    log::debug!("Book {}: navigation after close ignored", book_id)
                }
                Err(e) => {
                    log::warn!("Book {}: {}", book_id, e);
                    let _ = updates.send(ReaderUpdate::NavigationFailed {
                        message: e.to_string(),
                    });
                }
            }
        })
    }

    /// Tear down and tell the host. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.teardown();
        let _ = self.updates.send(ReaderUpdate::Closed);
    }

    fn teardown(&mut self) {
        self.closed = true;
        self.navigator.cancel();
        self.persister.shutdown();
        self.session.close();
        log::info!("Closed book {}", self.book_id);
    }
}

impl Drop for ViewerShell {
    fn drop(&mut self) {
        if !self.closed {
            self.teardown();
        }
    }
}
