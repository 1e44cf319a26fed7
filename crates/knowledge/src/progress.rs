//! Structured progress reporting for corpus ingestion.
//!
//! Ingestion of a large dump takes minutes because every chunk is embedded
//! with a pacing delay, so each phase reports incremental events.

use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted during ingestion.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Phase of the operation: "discover", "parse", "embed", "index"
    pub phase: &'static str,

    /// Current progress (files read, chunks embedded, ...)
    pub current: u64,

    /// Total expected work (if known)
    pub total: Option<u64>,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: Option<f64>,

    /// Human-readable message
    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: Option<f64>,
}

impl ProgressEvent {
    pub fn new(
        phase: &'static str,
        current: u64,
        total: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let percentage = total.map(|t| {
            if t > 0 {
                (current as f64 / t as f64) * 100.0
            } else {
                0.0
            }
        });

        Self {
            phase,
            current,
            total,
            percentage,
            message: message.into(),
            elapsed_secs: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self
    }

    /// Format as a single user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };

        let pct = self
            .percentage
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Emits progress events through an optional callback.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Instant::now(),
        }
    }

    /// A reporter that drops every event.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Instant::now(),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(callback) = &self.callback else {
            return;
        };

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let event = event.with_elapsed(elapsed);

        tracing::debug!(
            phase = event.phase,
            current = event.current,
            total = ?event.total,
            message = %event.message,
            elapsed_secs = elapsed,
            "Progress event"
        );

        callback(event);
    }

    pub fn discover(&self, files: u64, path: &str) {
        self.emit(ProgressEvent::new(
            "discover",
            files,
            None,
            format!("{} dump files under {}", files, path),
        ));
    }

    pub fn parse(&self, current: u64, total: u64, file: &str, threads: usize) {
        self.emit(ProgressEvent::new(
            "parse",
            current,
            Some(total),
            format!("{} threads in {}", threads, file),
        ));
    }

    pub fn embed(&self, current: u64, total: u64, title: &str, chunks: usize) {
        self.emit(ProgressEvent::new(
            "embed",
            current,
            Some(total),
            format!("{} chunks from \"{}\"", chunks, title),
        ));
    }

    pub fn index(&self, rows: usize, url: &str) {
        self.emit(ProgressEvent::new(
            "index",
            rows as u64,
            None,
            format!("writing {} rows to SQLite for {}", rows, url),
        ));
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_event_format() {
        let event = ProgressEvent::new("embed", 5, Some(10), "chunks");
        let formatted = event.format_simple();
        assert!(formatted.starts_with("[embed]"));
        assert!(formatted.contains("5/10"));
        assert!(formatted.contains("50%"));
    }

    #[test]
    fn test_zero_total_has_zero_percent() {
        let event = ProgressEvent::new("parse", 0, Some(0), "empty dump");
        assert_eq!(event.percentage, Some(0.0));
    }

    #[test]
    fn test_reporter_collects_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let reporter = ProgressReporter::new(Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        }));

        reporter.discover(3, "/dumps");
        reporter.index(12, "https://forum.example/t/1");

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].phase, "discover");
        assert_eq!(captured[1].current, 12);
        assert!(captured[1].elapsed_secs.is_some());
    }

    #[test]
    fn test_noop_reporter() {
        ProgressReporter::noop().parse(1, 1, "threads.json", 4);
    }
}
