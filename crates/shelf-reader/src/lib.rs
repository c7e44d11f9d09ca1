//! Reading-progress tracking and resumption for fixed-layout (PDF) and
//! reflowable (EPUB) books.

mod api;
pub mod constants;
pub mod engine;
pub mod loader;
pub mod locations;
mod logger;
pub mod navigation;
mod options;
pub mod outline;
pub mod persister;
pub mod session;
pub mod translator;
mod types;
pub mod wait;

pub use api::LibraryApi;
pub use engine::{DocumentEngine, EngineAdapter, ErrorBudget, Readiness, RenderedView};
pub use loader::{BuiltinEngines, EngineHandle, EngineHost, EngineLoader};
pub use locations::{ContentPoint, LocationIndex};
pub use logger::{AppLogger, LogEntry, SuppressionGuard};
pub use navigation::{NavOutcome, NavigationController, NoopObserver, ProgressObserver, Settled};
pub use options::*;
pub use outline::{OutlineEntry, OutlineResolver, ResolvedEntry};
pub use persister::ProgressPersister;
pub use session::{DocumentSession, DocumentSource, IndexWatch, SessionState};
pub use types::*;
