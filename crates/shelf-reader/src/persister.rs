//! Debounced, fire-and-forget progress saves
//!
//! Reports replace any pending snapshot and restart the quiescence window.
//! When the window elapses the pending snapshot is sent. At most one save is
//! in flight; a window that elapses during a save holds its snapshot until
//! that save completes and then sends it immediately. Failed saves are
//! logged and never retried, so the next report starts a fresh cycle.

use crate::api::LibraryApi;
use crate::navigation::{ProgressObserver, Settled};
use crate::types::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub struct ProgressPersister {
    book_id: u64,
    tx: mpsc::UnboundedSender<ProgressSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct SaveLoop {
    book_id: u64,
    auth: AuthContext,
    api: Arc<dyn LibraryApi>,
    window: Duration,
    done_tx: mpsc::UnboundedSender<()>,
}

impl ProgressPersister {
    /// Start the save loop for one book
    pub fn spawn(
        book_id: u64,
        auth: AuthContext,
        api: Arc<dyn LibraryApi>,
        window: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let save_loop = SaveLoop {
            book_id,
            auth,
            api,
            window,
            done_tx,
        };
        let task = tokio::spawn(save_loop.run(rx, done_rx));

        Self {
            book_id,
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn book_id(&self) -> u64 {
        self.book_id
    }

    /// Queue a snapshot; never blocks and never fails
    pub fn report(&self, snapshot: ProgressSnapshot) {
        if self.tx.send(snapshot).is_err() {
            log::debug!("Progress for book {} reported after shutdown", self.book_id);
        }
    }

    /// Cancel the pending save. A save already in flight runs to completion.
    pub fn shutdown(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            log::debug!("Stopped progress saves for book {}", self.book_id);
        }
    }
}

impl ProgressObserver for ProgressPersister {
    fn on_settled(&self, settled: &Settled) {
        self.report(settled.snapshot);
    }
}

impl Drop for ProgressPersister {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SaveLoop {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<ProgressSnapshot>,
        mut done_rx: mpsc::UnboundedReceiver<()>,
    ) {
        let mut pending: Option<ProgressSnapshot> = None;
        let mut deadline: Option<Instant> = None;
        let mut in_flight = false;
        let mut held = false;

        loop {
            let sleep_until = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;

                report = rx.recv() => match report {
                    Some(snapshot) => {
                        pending = Some(snapshot);
                        deadline = Some(Instant::now() + self.window);
                    }
                    None => break,
                },
                Some(()) = done_rx.recv() => {
                    in_flight = false;
                    if held {
                        held = false;
                        if let Some(snapshot) = pending.take() {
                            deadline = None;
                            self.start_save(snapshot);
                            in_flight = true;
                        }
                    }
                },
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                    deadline = None;
                    if in_flight {
                        held = true;
                    } else if let Some(snapshot) = pending.take() {
                        self.start_save(snapshot);
                        in_flight = true;
                    }
                },
            }
        }

        if pending.is_some() {
            log::debug!("Dropping unsent progress for book {}", self.book_id);
        }
    }

    fn start_save(&self, snapshot: ProgressSnapshot) {
        let api = Arc::clone(&self.api);
        let auth = self.auth;
        let book_id = self.book_id;
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            match api.save_progress(book_id, &auth, snapshot).await {
                Ok(()) => log::debug!(
                    "Saved progress for book {}: page {}, {:.1}%",
                    book_id,
                    snapshot.current_page,
                    snapshot.progress_percentage
                ),
                Err(e) => {
                    let error = ReaderError::PersistenceFailed(e.to_string());
                    log::warn!("Book {}: {}", book_id, error);
                }
            }
            let _ = done_tx.send(());
        });
    }
}
