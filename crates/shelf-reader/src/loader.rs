//! Lazy, idempotent acquisition of rendering engines
//!
//! Engines are fetched from an [`EngineHost`], which may need a resource to
//! be injected before an engine becomes available. The loader injects each
//! resource at most once per process and polls the host on a bounded
//! schedule. Concurrent `ensure` calls for the same kind share one load.

use crate::engine::{EngineAdapter, EpubAdapter, PdfAdapter};
use crate::logger::AppLogger;
use crate::options::ReaderConfig;
use crate::types::*;
use crate::wait::BoundedWait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

pub type EngineHandle = Arc<dyn EngineAdapter>;

/// Where engines come from
pub trait EngineHost: Send + Sync {
    /// Resource that makes `kind` available once injected
    fn resource_url(&self, kind: EngineKind) -> String;

    /// Begin loading a resource. Completion is observed through `lookup`.
    fn inject(&self, url: &str);

    fn lookup(&self, kind: EngineKind) -> Option<EngineHandle>;
}

/// Host for the engines compiled into this crate; always available
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinEngines;

impl EngineHost for BuiltinEngines {
    fn resource_url(&self, kind: EngineKind) -> String {
        format!("builtin:{kind}")
    }

    fn inject(&self, _url: &str) {}

    fn lookup(&self, kind: EngineKind) -> Option<EngineHandle> {
        match kind {
            EngineKind::Pdf => Some(Arc::new(PdfAdapter)),
            EngineKind::Epub => Some(Arc::new(EpubAdapter)),
        }
    }
}

pub struct EngineLoader {
    host: Arc<dyn EngineHost>,
    wait: BoundedWait,
    logger: Option<AppLogger>,
    suppressed: Vec<String>,
    pdf: OnceCell<EngineHandle>,
    epub: OnceCell<EngineHandle>,
    injected: Mutex<HashSet<String>>,
}

impl EngineLoader {
    pub fn new(host: Arc<dyn EngineHost>, config: &ReaderConfig) -> Self {
        Self {
            host,
            wait: BoundedWait::attempts(config.engine_poll_attempts, config.engine_poll_interval()),
            logger: None,
            suppressed: config.suppressed_warnings.clone(),
            pdf: OnceCell::new(),
            epub: OnceCell::new(),
            injected: Mutex::new(HashSet::new()),
        }
    }

    pub fn builtin(config: &ReaderConfig) -> Self {
        Self::new(Arc::new(BuiltinEngines), config)
    }

    /// Silence the configured warnings on `logger` while an engine loads
    pub fn with_logger(mut self, logger: AppLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Engine handle for `kind`, loading it on first use
    ///
    /// A failed load leaves nothing cached, so a later call retries.
    pub async fn ensure(&self, kind: EngineKind) -> Result<EngineHandle> {
        let cell = match kind {
            EngineKind::Pdf => &self.pdf,
            EngineKind::Epub => &self.epub,
        };
        cell.get_or_try_init(|| self.load(kind)).await.cloned()
    }

    /// Engine for a stored book, or `UnsupportedFormat`
    pub async fn ensure_for(&self, format: BookFormat) -> Result<EngineHandle> {
        let kind = format
            .engine()
            .ok_or_else(|| ReaderError::UnsupportedFormat(format.to_string()))?;
        self.ensure(kind).await
    }

    pub fn is_loaded(&self, kind: EngineKind) -> bool {
        match kind {
            EngineKind::Pdf => self.pdf.initialized(),
            EngineKind::Epub => self.epub.initialized(),
        }
    }

    /// Resources injected so far
    pub fn injected(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.lock_injected().iter().cloned().collect();
        urls.sort();
        urls
    }

    async fn load(&self, kind: EngineKind) -> Result<EngineHandle> {
        let _quiet = self.logger.as_ref().map(|l| l.suppress(self.suppressed.as_slice()));

        if let Some(handle) = self.host.lookup(kind) {
            log::debug!("{} engine already available", kind);
            return Ok(handle);
        }

        let url = self.host.resource_url(kind);
        if self.lock_injected().insert(url.clone()) {
            log::info!("Injecting {} engine from {}", kind, url);
            self.host.inject(&url);
        }

        let mut found = None;
        let waited = self
            .wait
            .until(|| {
                found = self.host.lookup(kind);
                found.is_some()
            })
            .await;

        match (waited, found) {
            (Ok(()), Some(handle)) => {
                log::info!("{} engine ready", kind);
                Ok(handle)
            }
            (Err(timed_out), _) => Err(ReaderError::EngineUnavailable(format!(
                "{kind} engine from {url}: {timed_out}"
            ))),
            (Ok(()), None) => Err(ReaderError::EngineUnavailable(format!(
                "{kind} engine from {url} disappeared after loading"
            ))),
        }
    }

    fn lock_injected(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.injected.lock().unwrap_or_else(|p| p.into_inner())
    }
}
