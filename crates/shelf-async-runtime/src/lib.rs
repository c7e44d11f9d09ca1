mod api;
mod local;
mod shell;
mod worker;

pub use api::HttpLibrary;
pub use local::LocalLibrary;
pub use shell::{OpenRequest, ViewerShell};
pub use worker::reader_task;

// Re-export types from the library crate
pub use shelf_reader::{
    AuthContext, BookFormat, BookRecord, DocumentId, EngineLoader, ErrorKind, LibraryApi,
    LocationToken, NavTarget, Position, ReaderConfig, ReaderError, ResolvedEntry,
};

/// Commands sent from the host to a reading session
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderCommand {
    Next,
    Prev,
    GoTo {
        target: NavTarget,
    },
    /// Jump to an entry of the resolved outline sent with `Ready`
    JumpToChapter {
        index: usize,
    },
    Close,
}

/// Updates sent from a reading session to the host
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderUpdate {
    Ready {
        doc_id: DocumentId,
        total_units: u32,
        outline: Vec<ResolvedEntry>,
    },
    PageRendered {
        position: Position,
        summary: String,
    },
    /// Fired after every settled navigation, percentage in `[0, 100]`
    ProgressChanged {
        percentage: f64,
    },
    /// EPUB only; the token to persist for exact resumption
    LocationChanged {
        token: LocationToken,
        fraction: f64,
    },
    /// A page turn failed; the current position is unchanged
    NavigationFailed {
        message: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Closed,
}
