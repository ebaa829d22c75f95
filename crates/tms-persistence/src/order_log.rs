//! Append-only order audit trail.

use std::path::Path;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tms_core::{OrderMode, OrderStatus, Price, Quantity};
use tracing::info;

use crate::error::PersistenceResult;
use crate::writer::JsonLinesWriter;

/// One audit row per terminal order outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Exchange-local time the outcome was recorded.
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub mode: OrderMode,
    pub attempt_count: u32,
}

/// Append-only sink for order rows. Rows are never read back or mutated.
pub trait OrderLog: Send + Sync {
    fn append(&self, record: &OrderRecord) -> PersistenceResult<()>;
}

/// JSON Lines audit log, one file per day, every row flushed on append.
pub struct JsonlOrderLog {
    writer: Mutex<JsonLinesWriter<OrderRecord>>,
}

impl JsonlOrderLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            writer: Mutex::new(JsonLinesWriter::new(dir, "orders", 1)),
        }
    }
}

impl OrderLog for JsonlOrderLog {
    fn append(&self, record: &OrderRecord) -> PersistenceResult<()> {
        self.writer
            .lock()
            .add_record(record.timestamp.date(), record.clone())?;
        info!(
            symbol = %record.symbol,
            quantity = %record.quantity,
            price = ?record.price.map(|p| p.to_string()),
            status = %record.status,
            mode = %record.mode,
            attempts = record.attempt_count,
            "Order logged"
        );
        Ok(())
    }
}

/// In-memory log for tests.
#[derive(Debug, Default)]
pub struct MemoryOrderLog {
    records: Mutex<Vec<OrderRecord>>,
}

impl MemoryOrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OrderRecord> {
        self.records.lock().clone()
    }
}

impl OrderLog for MemoryOrderLog {
    fn append(&self, record: &OrderRecord) -> PersistenceResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    fn record(status: OrderStatus, mode: OrderMode) -> OrderRecord {
        OrderRecord {
            timestamp: NaiveDate::from_ymd_opt(2026, 2, 9)
                .unwrap()
                .and_hms_opt(11, 0, 0)
                .unwrap(),
            symbol: "NABIL".to_string(),
            quantity: Quantity::from(10),
            price: Some(Price::new(dec!(110))),
            status,
            mode,
            attempt_count: 4,
        }
    }

    #[test]
    fn test_jsonl_order_log_writes_every_row() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlOrderLog::new(temp_dir.path());
        log.append(&record(OrderStatus::Success, OrderMode::Boundary))
            .unwrap();
        log.append(&record(OrderStatus::FormFilled, OrderMode::FormOnly))
            .unwrap();

        let entry = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .next()
            .unwrap();
        // Named for the row's exchange-local date, not the host's.
        assert_eq!(entry.file_name().to_string_lossy(), "orders_2026-02-09.jsonl");

        let file = std::fs::File::open(entry.path()).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map_while(|l| l.ok()).collect();
        assert_eq!(lines.len(), 2);

        let second: OrderRecord = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second.status, OrderStatus::FormFilled);
        assert_eq!(second.mode, OrderMode::FormOnly);
        assert!(lines[0].contains("\"status\":\"SUCCESS\""));
        assert!(lines[0].contains("\"attempt_count\":4"));
    }

    #[test]
    fn test_memory_order_log() {
        let log = MemoryOrderLog::new();
        log.append(&record(OrderStatus::Failed, OrderMode::Continuous))
            .unwrap();
        assert_eq!(log.records().len(), 1);
        assert_eq!(log.records()[0].status, OrderStatus::Failed);
    }
}
