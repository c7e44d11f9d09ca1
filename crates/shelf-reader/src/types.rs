use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Rendering engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Document did not become ready within {0:?}")]
    OpenTimeout(Duration),
    #[error("Document appears corrupt ({errors} parser errors, last: {last})")]
    CorruptDocument { errors: usize, last: String },
    #[error("Navigation failed: {0}")]
    NavigationFailed(String),
    #[error("Progress save failed: {0}")]
    PersistenceFailed(String),
    #[error("Outline entry could not be resolved: {0}")]
    OutlineResolutionFailed(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Session is closed")]
    SessionClosed,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("EPUB container error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ReaderError>;

/// Copyable discriminant of [`ReaderError`], reported to hosts alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    EngineUnavailable,
    OpenTimeout,
    CorruptDocument,
    NavigationFailed,
    PersistenceFailed,
    OutlineResolutionFailed,
    UnsupportedFormat,
    SessionClosed,
    Http,
    Config,
    Io,
}

impl ReaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReaderError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            ReaderError::OpenTimeout(_) => ErrorKind::OpenTimeout,
            ReaderError::CorruptDocument { .. }
            | ReaderError::Pdf(_)
            | ReaderError::Zip(_)
            | ReaderError::Xml(_) => ErrorKind::CorruptDocument,
            ReaderError::NavigationFailed(_) => ErrorKind::NavigationFailed,
            ReaderError::PersistenceFailed(_) => ErrorKind::PersistenceFailed,
            ReaderError::OutlineResolutionFailed(_) => ErrorKind::OutlineResolutionFailed,
            ReaderError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            ReaderError::SessionClosed => ErrorKind::SessionClosed,
            ReaderError::Http(_) => ErrorKind::Http,
            ReaderError::Config(_) => ErrorKind::Config,
            ReaderError::Io(_) | ReaderError::TaskJoin(_) => ErrorKind::Io,
        }
    }
}

/// Container format of a stored book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BookFormat {
    Pdf,
    Epub,
    /// Accepted by the library but never rendered
    Org,
}

impl BookFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Some(BookFormat::Pdf),
            "epub" => Some(BookFormat::Epub),
            "org" => Some(BookFormat::Org),
            _ => None,
        }
    }

    /// Guess the format from a file extension
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
    }

    pub fn engine(self) -> Option<EngineKind> {
        match self {
            BookFormat::Pdf => Some(EngineKind::Pdf),
            BookFormat::Epub => Some(EngineKind::Epub),
            BookFormat::Org => None,
        }
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookFormat::Pdf => "pdf",
            BookFormat::Epub => "epub",
            BookFormat::Org => "org",
        };
        f.write_str(s)
    }
}

/// Rendering engine families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Pdf,
    Epub,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Pdf => f.write_str("pdf"),
            EngineKind::Epub => f.write_str("epub"),
        }
    }
}

/// Read model of a library book. Owned by the library backend, read-only here.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BookRecord {
    pub id: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub title: String,
    pub format: BookFormat,
    #[cfg_attr(feature = "serde", serde(default))]
    pub file_url: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub current_page: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub progress_percentage: f64,
}

/// Identity of the reader, attached to every backend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AuthContext {
    pub user_id: u64,
    pub is_authenticated: bool,
}

impl AuthContext {
    pub const HEADER: &'static str = "X-User-ID";

    pub fn user(user_id: u64) -> Self {
        Self {
            user_id,
            is_authenticated: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            is_authenticated: false,
        }
    }

    /// Caller-identity header, if the reader is authenticated
    pub fn header(&self) -> Option<(&'static str, String)> {
        self.is_authenticated
            .then(|| (Self::HEADER, self.user_id.to_string()))
    }
}

/// Opaque position inside a continuously flowing document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationToken(pub String);

impl LocationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current unit of a viewing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// 1-based page number
    Page(u32),
    Location(LocationToken),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Page(page) => write!(f, "page {page}"),
            Position::Location(token) => write!(f, "{token}"),
        }
    }
}

/// Requested navigation destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavTarget {
    Page(u32),
    Location(LocationToken),
    /// Content document reference, optionally with a fragment
    Href(String),
}

impl NavTarget {
    /// Interpret user input: digits become a page, anything else an EPUB reference
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Ok(page) = input.parse::<u32>() {
            NavTarget::Page(page)
        } else if input.starts_with("epubcfi(") {
            NavTarget::Location(LocationToken::new(input))
        } else {
            NavTarget::Href(input.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// The `(current_page, progress_percentage)` pair sent to the backend
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressSnapshot {
    pub current_page: u32,
    /// Percentage in [0, 100]
    pub progress_percentage: f64,
}

/// Handle to an opened document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);
