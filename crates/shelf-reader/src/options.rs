use crate::constants::*;
use crate::types::*;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Reading-session configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReaderConfig {
    // Backend
    pub api_base_url: String,

    // Persistence
    pub debounce_ms: u64,

    // Engine loading
    pub engine_poll_attempts: u32,
    pub engine_poll_interval_ms: u64,
    pub suppressed_warnings: Vec<String>,

    // Document open
    pub open_timeout_ms: u64,
    pub open_fallback_timeout_ms: u64,
    pub max_parser_errors: usize,

    // EPUB indexing
    pub index_units_per_spine_item: usize,
    pub index_min_units: usize,
    pub index_rerun_threshold: f64,
    pub epub_page_chars: usize,
    pub resume_index_wait_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            engine_poll_attempts: DEFAULT_ENGINE_POLL_ATTEMPTS,
            engine_poll_interval_ms: DEFAULT_ENGINE_POLL_INTERVAL.as_millis() as u64,
            suppressed_warnings: DEFAULT_SUPPRESSED_WARNINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT.as_millis() as u64,
            open_fallback_timeout_ms: DEFAULT_OPEN_FALLBACK_TIMEOUT.as_millis() as u64,
            max_parser_errors: DEFAULT_MAX_PARSER_ERRORS,
            index_units_per_spine_item: DEFAULT_UNITS_PER_SPINE_ITEM,
            index_min_units: DEFAULT_MIN_INDEX_UNITS,
            index_rerun_threshold: DEFAULT_INDEX_RERUN_THRESHOLD,
            epub_page_chars: DEFAULT_EPUB_PAGE_CHARS,
            resume_index_wait_ms: DEFAULT_RESUME_INDEX_WAIT.as_millis() as u64,
        }
    }
}

impl ReaderConfig {
    /// Load configuration from a JSON file
    #[cfg(feature = "serde")]
    pub async fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ReaderError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    #[cfg(feature = "serde")]
    pub async fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ReaderError::Config(format!("Failed to serialize config: {}", e)))?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(ReaderError::Config(
                "Debounce window must be greater than zero".to_string(),
            ));
        }
        if self.engine_poll_attempts == 0 || self.engine_poll_interval_ms == 0 {
            return Err(ReaderError::Config(
                "Engine polling needs at least one attempt and a non-zero interval".to_string(),
            ));
        }
        if self.open_timeout_ms == 0 {
            return Err(ReaderError::Config(
                "Open timeout must be greater than zero".to_string(),
            ));
        }
        if self.open_fallback_timeout_ms < self.open_timeout_ms {
            return Err(ReaderError::Config(format!(
                "Fallback open timeout ({}ms) is shorter than the fast timeout ({}ms)",
                self.open_fallback_timeout_ms, self.open_timeout_ms
            )));
        }
        if self.max_parser_errors == 0 {
            return Err(ReaderError::Config(
                "Parser error cap must be at least 1".to_string(),
            ));
        }
        if !(self.index_rerun_threshold > 0.0 && self.index_rerun_threshold <= 1.0) {
            return Err(ReaderError::Config(format!(
                "Index re-run threshold {} is outside (0, 1]",
                self.index_rerun_threshold
            )));
        }
        if self.index_min_units == 0 || self.index_units_per_spine_item == 0 {
            return Err(ReaderError::Config(
                "Index density must be greater than zero".to_string(),
            ));
        }
        if self.epub_page_chars == 0 {
            return Err(ReaderError::Config(
                "EPUB page size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn engine_poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine_poll_interval_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn open_fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.open_fallback_timeout_ms)
    }

    pub fn resume_index_wait(&self) -> Duration {
        Duration::from_millis(self.resume_index_wait_ms)
    }

    /// Index slot target for a book with `spine_len` content documents
    pub fn index_target(&self, spine_len: usize) -> usize {
        (spine_len * self.index_units_per_spine_item).max(self.index_min_units)
    }
}
