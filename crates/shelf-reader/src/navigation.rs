//! Position tracking and navigation for one open document
//!
//! Every navigation that will render claims a new generation before it
//! starts. When its render completes, the result is applied only if no
//! newer navigation has claimed a generation in the meantime; otherwise it
//! is discarded. The claim and the apply both happen under the state lock,
//! so the last request always wins regardless of completion order.

use crate::constants::{DENSE_UNITS_PER_SPINE_ITEM, DENSIFY_PROGRESS_THRESHOLD, SPARSE_UNITS_PER_SPINE_ITEM};
use crate::engine::{DocumentEngine, RenderedView};
use crate::session::IndexWatch;
use crate::translator;
use crate::types::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// A navigation that reached the screen
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub position: Position,
    /// Progress through the book in `[0, 1]`
    pub fraction: f64,
    pub snapshot: ProgressSnapshot,
    pub view: RenderedView,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    Settled(Settled),
    /// A newer navigation was requested before this one finished
    Superseded,
    /// The target does not exist or lies beyond either end of the book
    Unchanged,
}

/// Receives every settled navigation, in settle order
pub trait ProgressObserver: Send + Sync {
    fn on_settled(&self, settled: &Settled);
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_settled(&self, _settled: &Settled) {}
}

struct NavState {
    current: Position,
    /// Latest requested position; steps are taken from here
    requested: Position,
    fraction: f64,
    surface: Option<RenderedView>,
}

pub struct NavigationController {
    engine: Arc<dyn DocumentEngine>,
    index: IndexWatch,
    observer: Arc<dyn ProgressObserver>,
    state: Mutex<NavState>,
    generation: AtomicU64,
    closed: AtomicBool,
    densify_tx: Option<mpsc::UnboundedSender<usize>>,
    densify_requested: AtomicBool,
}

impl NavigationController {
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        index: IndexWatch,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        let start = engine.start_position();
        Self {
            engine,
            index,
            observer,
            state: Mutex::new(NavState {
                current: start.clone(),
                requested: start,
                fraction: 0.0,
                surface: None,
            }),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            densify_tx: None,
            densify_requested: AtomicBool::new(false),
        }
    }

    /// Ask for a denser location index, in slots per spine item, when the
    /// reader nears the end of a sparsely indexed book
    pub fn with_densify_requests(mut self, tx: mpsc::UnboundedSender<usize>) -> Self {
        self.densify_tx = Some(tx);
        self
    }

    pub fn current(&self) -> Position {
        self.lock().current.clone()
    }

    /// Progress of the current position in `[0, 1]`
    pub fn progress(&self) -> f64 {
        self.lock().fraction
    }

    pub fn surface(&self) -> Option<RenderedView> {
        self.lock().surface.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn next(&self) -> Result<NavOutcome> {
        let outcome = self.step(Direction::Forward).await?;
        if matches!(outcome, NavOutcome::Settled(_)) {
            self.maybe_densify();
        }
        Ok(outcome)
    }

    pub async fn prev(&self) -> Result<NavOutcome> {
        self.step(Direction::Backward).await
    }

    pub async fn go_to(&self, target: NavTarget) -> Result<NavOutcome> {
        self.ensure_open()?;
        match self.engine.locate(&target) {
            Some(position) => self.navigate(position).await,
            None => {
                log::debug!("Ignoring navigation to unknown target {:?}", target);
                Ok(NavOutcome::Unchanged)
            }
        }
    }

    /// Display `position` without resolving it first
    pub async fn display(&self, position: Position) -> Result<NavOutcome> {
        self.ensure_open()?;
        self.navigate(position).await
    }

    /// Invalidate in-flight navigations and refuse new ones
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        state.surface = None;
    }

    async fn step(&self, direction: Direction) -> Result<NavOutcome> {
        self.ensure_open()?;
        // Read, step and claim under one lock so concurrent steps chain
        let (position, generation) = {
            let mut state = self.lock();
            let Some(position) = self.engine.step(&state.requested, direction) else {
                return Ok(NavOutcome::Unchanged);
            };
            let generation = self.claim(&mut state, &position);
            (position, generation)
        };
        self.finish(position, generation).await
    }

    async fn navigate(&self, position: Position) -> Result<NavOutcome> {
        let generation = {
            let mut state = self.lock();
            self.claim(&mut state, &position)
        };
        self.finish(position, generation).await
    }

    /// Record `position` as the latest request and take a new generation
    fn claim(&self, state: &mut NavState, position: &Position) -> u64 {
        state.requested = position.clone();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn finish(&self, position: Position, generation: u64) -> Result<NavOutcome> {
        let rendered = self.engine.render(&position).await;

        let mut state = self.lock();
        if self.is_closed() || self.generation.load(Ordering::SeqCst) != generation {
            log::debug!("Discarding superseded navigation to {}", position);
            return Ok(NavOutcome::Superseded);
        }

        let view = match rendered {
            Ok(view) => view,
            Err(e) => {
                state.requested = state.current.clone();
                log::warn!("Navigation to {} failed: {}", position, e);
                return Err(ReaderError::NavigationFailed(e.to_string()));
            }
        };

        let position = view.position.clone();
        let (fraction, snapshot) = self.measure(&position, &view);
        let settled = Settled {
            position: position.clone(),
            fraction,
            snapshot,
            view: view.clone(),
        };

        state.current = position.clone();
        state.requested = position;
        state.fraction = fraction;
        // The previous surface is released here
        state.surface = Some(view);

        self.observer.on_settled(&settled);
        Ok(NavOutcome::Settled(settled))
    }

    fn measure(&self, position: &Position, view: &RenderedView) -> (f64, ProgressSnapshot) {
        match position {
            Position::Page(page) => {
                let total = self.engine.unit_count();
                (
                    translator::pdf_progress(*page, total),
                    translator::pdf_snapshot(*page, total),
                )
            }
            Position::Location(token) => {
                let index = self.index.borrow().clone();
                let fraction =
                    translator::epub_progress(view.reported_fraction, Some(token), index.as_deref());
                (fraction, translator::epub_snapshot(fraction))
            }
        }
    }

    fn maybe_densify(&self) {
        let Some(tx) = &self.densify_tx else {
            return;
        };
        if self.engine.kind() != EngineKind::Epub || self.progress() <= DENSIFY_PROGRESS_THRESHOLD {
            return;
        }

        let spine_len = self.engine.unit_count() as usize;
        let sparse = match self.index.borrow().as_ref() {
            Some(index) => index.len() < spine_len * SPARSE_UNITS_PER_SPINE_ITEM,
            None => false,
        };
        if sparse && !self.densify_requested.swap(true, Ordering::SeqCst) {
            log::info!("Requesting a denser location index near the end of the book");
            let _ = tx.send(DENSE_UNITS_PER_SPINE_ITEM);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ReaderError::SessionClosed);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, NavState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
