use chrono::{DateTime, Local};
use log::{Level, LevelFilter, Metadata, Record};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// In-memory logger with optional stderr echo and scoped message suppression
#[derive(Clone)]
pub struct AppLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    suppressed: Arc<Mutex<Vec<String>>>,
    max_entries: usize,
    level: LevelFilter,
    echo: bool,
}

impl AppLogger {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            suppressed: Arc::new(Mutex::new(Vec::new())),
            max_entries,
            level: LevelFilter::Info,
            echo: false,
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Also write every accepted record to stderr
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn init(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    pub fn get_entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).clone()
    }

    pub fn latest_message(&self) -> Option<String> {
        lock(&self.entries).last().map(|entry| entry.message.clone())
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Drop non-error records containing any of `patterns` until the guard is dropped
    pub fn suppress<S: AsRef<str>>(&self, patterns: &[S]) -> SuppressionGuard {
        let mut suppressed = lock(&self.suppressed);
        let previous = suppressed.clone();
        suppressed.extend(patterns.iter().map(|p| p.as_ref().to_string()));
        SuppressionGuard {
            suppressed: Arc::clone(&self.suppressed),
            previous: Some(previous),
        }
    }

    fn is_suppressed(&self, level: Level, message: &str) -> bool {
        level != Level::Error
            && lock(&self.suppressed)
                .iter()
                .any(|pattern| message.contains(pattern.as_str()))
    }

    /// Apply the logger's own level and suppression rules to a record
    pub fn record(&self, level: Level, target: &str, message: String) {
        if level > self.level || self.is_suppressed(level, &message) {
            return;
        }

        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            target: target.to_string(),
            message,
        };

        if self.echo {
            eprintln!(
                "{} {:<5} {}: {}",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.level,
                entry.target,
                entry.message
            );
        }

        let mut entries = lock(&self.entries);
        entries.push(entry);

        // Keep only the most recent entries
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(0..excess);
        }
    }
}

impl log::Log for AppLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.record(record.level(), record.target(), format!("{}", record.args()));
        }
    }

    fn flush(&self) {}
}

/// Restores the previous suppression list when dropped
pub struct SuppressionGuard {
    suppressed: Arc<Mutex<Vec<String>>>,
    previous: Option<Vec<String>>,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *lock(&self.suppressed) = previous;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_is_scoped() {
        let logger = AppLogger::new(10);
        {
            let _guard = logger.suppress(&["Knockout groups"]);
            logger.record(Level::Warn, "engine", "Knockout groups not supported".into());
            logger.record(Level::Error, "engine", "Knockout groups failed hard".into());
        }
        logger.record(Level::Warn, "engine", "Knockout groups not supported".into());

        let messages: Vec<_> = logger.get_entries().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec!["Knockout groups failed hard", "Knockout groups not supported"]
        );
    }

    #[test]
    fn keeps_most_recent_entries() {
        let logger = AppLogger::new(2);
        for i in 0..5 {
            logger.record(Level::Info, "test", format!("entry {i}"));
        }
        assert_eq!(logger.get_entries().len(), 2);
        assert_eq!(logger.latest_message().as_deref(), Some("entry 4"));
    }
}
