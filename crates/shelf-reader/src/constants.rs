//! Shared constants for progress tracking
//!
//! Defaults for [`crate::ReaderConfig`] and the fixed numbers used by the
//! translator and the EPUB indexing pass.

use std::time::Duration;

// =============================================================================
// Persistence
// =============================================================================

/// Quiescence window before a progress save fires
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Upper bound of the persisted percentage (backend validates 0..=100)
pub const MAX_PERCENTAGE: f64 = 100.0;

// =============================================================================
// Engine loading and document open
// =============================================================================

/// Polls of the engine host before giving up
pub const DEFAULT_ENGINE_POLL_ATTEMPTS: u32 = 10;

/// Delay between engine host polls
pub const DEFAULT_ENGINE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Open timeout for engines whose open future resolves
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Open timeout for engines that only signal readiness
pub const DEFAULT_OPEN_FALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Recoverable parser errors tolerated on a single open attempt
pub const DEFAULT_MAX_PARSER_ERRORS: usize = 5;

/// Warnings silenced while an engine loads
pub const DEFAULT_SUPPRESSED_WARNINGS: &[&str] = &["Knockout groups"];

// =============================================================================
// EPUB location index
// =============================================================================

/// Target index slots per spine item
pub const DEFAULT_UNITS_PER_SPINE_ITEM: usize = 300;

/// Minimum number of index slots for a whole book
pub const DEFAULT_MIN_INDEX_UNITS: usize = 2000;

/// Re-run the indexing pass when it yields less than this share of the target
pub const DEFAULT_INDEX_RERUN_THRESHOLD: f64 = 0.7;

/// Progress above which `next()` asks for a denser index
pub const DENSIFY_PROGRESS_THRESHOLD: f64 = 0.9;

/// Slots per spine item below which the index counts as sparse
pub const SPARSE_UNITS_PER_SPINE_ITEM: usize = 100;

/// Slots per spine item requested by a densifying pass
pub const DENSE_UNITS_PER_SPINE_ITEM: usize = 200;

/// Characters of text shown per EPUB "page"
pub const DEFAULT_EPUB_PAGE_CHARS: usize = 1500;

/// How long resumption waits for the index before falling back to the start
pub const DEFAULT_RESUME_INDEX_WAIT: Duration = Duration::from_secs(10);

// =============================================================================
// Backend
// =============================================================================

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
