//! Rendering engines
//!
//! One engine per container family. An engine owns a parsed document and
//! renders owned views of it; the navigation controller never shares a view
//! with the engine after it has been returned.

pub mod epub;
pub mod pdf;

pub use epub::{EpubAdapter, EpubEngine};
pub use pdf::{PdfAdapter, PdfEngine};

use crate::options::ReaderConfig;
use crate::outline::OutlineEntry;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An owned rendering of one position
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedView {
    pub position: Position,
    /// Short human-readable description, e.g. "Page 3 of 10"
    pub label: String,
    /// Extracted text of the rendered unit
    pub text: String,
    /// Page size in points, when the format has one
    pub size: Option<(f32, f32)>,
    /// Progress through the book as computed by the engine itself
    pub reported_fraction: Option<f64>,
}

/// How an engine tells the session that a document is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The open future resolves once the document is ready
    Resolves,
    /// Readiness is signalled separately and may never arrive
    Signals,
}

/// A parsed, open document
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Pages for PDF; spine items for EPUB until a location index exists
    fn unit_count(&self) -> u32;

    fn start_position(&self) -> Position;

    /// Neighbouring position, or `None` at either end of the book
    fn step(&self, from: &Position, direction: Direction) -> Option<Position>;

    /// Normalise a requested target, or `None` if it does not exist in this document
    fn locate(&self, target: &NavTarget) -> Option<Position>;

    async fn render(&self, position: &Position) -> Result<RenderedView>;

    fn outline(&self) -> Vec<OutlineEntry>;

    fn resolve(&self, entry: &OutlineEntry) -> Option<NavTarget>;

    /// Text length of each spine item, for engines that need a location index
    fn content_lengths(&self) -> Option<Vec<usize>> {
        None
    }

    /// Release parsed resources. Safe to call more than once.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Entry point of an engine family, as registered with an engine host
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn readiness(&self) -> Readiness;

    /// Parse a container. Recoverable problems are recorded in `budget`.
    async fn open(
        &self,
        bytes: Vec<u8>,
        budget: Arc<ErrorBudget>,
        config: &ReaderConfig,
    ) -> Result<Arc<dyn DocumentEngine>>;
}

/// Counts recoverable parser errors during one open attempt
#[derive(Debug)]
pub struct ErrorBudget {
    cap: usize,
    count: AtomicUsize,
    last: Mutex<String>,
}

impl ErrorBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            count: AtomicUsize::new(0),
            last: Mutex::new(String::new()),
        }
    }

    /// Record a recoverable error; fails once the cap is reached
    pub fn record(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        log::warn!("Parser error: {}", message);

        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = message.clone();

        if count >= self.cap {
            return Err(ReaderError::CorruptDocument {
                errors: count,
                last: message,
            });
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Convert a fatal container error into `CorruptDocument`
    pub fn corrupt(&self, error: &ReaderError) -> ReaderError {
        ReaderError::CorruptDocument {
            errors: self.count().max(1),
            last: error.to_string(),
        }
    }
}
