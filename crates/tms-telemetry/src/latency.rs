//! Action-to-acknowledgement latency profiler.
//!
//! The dispatch loop marks the start on its first attempt and the end when a
//! confirmation is observed. `flush` turns a complete pair into one
//! `LatencyRecord` line and resets both marks; a half-set pair is discarded
//! silently. Marks are monotonic `Instant`s; the record timestamp is
//! exchange-local wall clock.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tms_core::Clock;
use tms_persistence::JsonLinesWriter;
use tracing::{debug, warn};

use crate::metrics::Metrics;

/// One latency sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub timestamp: NaiveDateTime,
    pub latency_ms: f64,
    pub label: String,
}

pub struct LatencyProfiler {
    start: Option<Instant>,
    end: Option<Instant>,
    clock: Arc<dyn Clock>,
    writer: Option<JsonLinesWriter<LatencyRecord>>,
}

impl LatencyProfiler {
    /// Profiler appending to `{dir}/latency_{date}.jsonl`.
    pub fn new(dir: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        Self {
            start: None,
            end: None,
            clock,
            writer: Some(JsonLinesWriter::new(dir, "latency", 1)),
        }
    }

    /// Profiler that only feeds the metric, no file.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            start: None,
            end: None,
            clock,
            writer: None,
        }
    }

    #[inline]
    pub fn mark_start(&mut self) {
        self.start = Some(Instant::now());
    }

    #[inline]
    pub fn mark_end(&mut self) {
        self.end = Some(Instant::now());
    }

    /// Whether a start mark is pending.
    pub fn is_started(&self) -> bool {
        self.start.is_some()
    }

    /// Emit the pending sample, if complete, and reset both marks.
    pub fn flush(&mut self, label: &str) -> Option<LatencyRecord> {
        let (start, end) = match (self.start.take(), self.end.take()) {
            (Some(start), Some(end)) => (start, end),
            _ => return None,
        };

        let latency_ms = end.saturating_duration_since(start).as_secs_f64() * 1000.0;
        let record = LatencyRecord {
            timestamp: self.clock.now(),
            latency_ms,
            label: label.to_string(),
        };

        Metrics::ack_latency(label, latency_ms);
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.add_record(record.timestamp.date(), record.clone()) {
                warn!(?e, label, "Failed to write latency record");
            }
        }
        debug!(label, latency_ms, "Latency sample recorded");
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;
    use tms_core::ManualClock;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 2, 9)
                .unwrap()
                .and_hms_opt(11, 0, 0)
                .unwrap(),
        ))
    }

    #[test]
    fn test_flush_requires_both_marks() {
        let mut profiler = LatencyProfiler::in_memory(clock());
        assert!(profiler.flush("order").is_none());

        profiler.mark_start();
        assert!(profiler.flush("order").is_none());
        // The half sample was discarded.
        assert!(!profiler.is_started());

        profiler.mark_end();
        assert!(profiler.flush("order").is_none());
    }

    #[test]
    fn test_flush_emits_and_resets() {
        let mut profiler = LatencyProfiler::in_memory(clock());
        profiler.mark_start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        profiler.mark_end();

        let record = profiler.flush("order").unwrap();
        assert!(record.latency_ms >= 2.0);
        assert_eq!(record.label, "order");
        assert!(profiler.flush("order").is_none());
    }

    #[test]
    fn test_records_written_as_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let mut profiler = LatencyProfiler::new(temp_dir.path(), clock());
        for _ in 0..2 {
            profiler.mark_start();
            profiler.mark_end();
            profiler.flush("boundary");
        }

        let entry = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .next()
            .unwrap();
        assert_eq!(entry.file_name().to_string_lossy(), "latency_2026-02-09.jsonl");
        let file = std::fs::File::open(entry.path()).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map_while(|l| l.ok()).collect();
        assert_eq!(lines.len(), 2);
        let record: LatencyRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(record.label, "boundary");
    }
}
