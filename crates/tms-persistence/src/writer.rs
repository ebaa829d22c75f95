//! JSON Lines file writer.
//!
//! One record per line, files named `{prefix}_{YYYY-MM-DD}.jsonl`. Callers
//! pass each record's exchange-local date, so rows land in the file of the
//! trading day they belong to whatever the host time zone. Files are opened
//! in append mode, so restarts never truncate earlier rows and a torn write
//! only damages its own line.

use crate::error::PersistenceResult;
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Active writer state for daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: NaiveDate,
    records_written: usize,
}

/// Buffered JSON Lines writer for any serializable record type.
pub struct JsonLinesWriter<T: Serialize> {
    base_dir: PathBuf,
    prefix: String,
    buffer: Vec<(NaiveDate, T)>,
    /// Records buffered before an automatic flush. 1 writes through.
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
    _record: PhantomData<fn(T)>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    /// Create a writer rooted at `base_dir`. The directory is created lazily
    /// if it cannot be created now.
    pub fn new(base_dir: impl AsRef<Path>, prefix: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create log directory");
        }

        let max_buffer_size = max_buffer_size.max(1);
        Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size),
            max_buffer_size,
            active_writer: None,
            _record: PhantomData,
        }
    }

    /// Path of the file for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.base_dir
            .join(format!("{}_{}.jsonl", self.prefix, date.format("%Y-%m-%d")))
    }

    /// Buffer a record for the file of `date`, flushing when the buffer is
    /// full.
    pub fn add_record(&mut self, date: NaiveDate, record: T) -> PersistenceResult<()> {
        self.buffer.push((date, record));

        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush writer on close");
            }
            info!(
                prefix = %self.prefix,
                date = %active.date,
                records = active.records_written,
                "Closed JSON Lines writer"
            );
        }
    }

    fn open_writer(&self, date: NaiveDate) -> PersistenceResult<ActiveWriter> {
        std::fs::create_dir_all(&self.base_dir)?;
        let path = self.path_for(date);
        debug!(path = %path.display(), "Opening JSON Lines writer (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date,
            records_written: 0,
        })
    }

    /// Write buffered records to their dated files and flush to the OS.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let buffer = std::mem::take(&mut self.buffer);
        let record_count = buffer.len();
        for (date, record) in &buffer {
            let needs_rotation = self
                .active_writer
                .as_ref()
                .is_some_and(|w| w.date != *date);
            if needs_rotation {
                self.close_active_writer();
            }

            let mut active = match self.active_writer.take() {
                Some(active) => active,
                None => self.open_writer(*date)?,
            };
            let json = serde_json::to_string(record)?;
            writeln!(active.writer, "{json}")?;
            active.records_written += 1;
            self.active_writer = Some(active);
        }
        if let Some(active) = self.active_writer.as_mut() {
            active.writer.flush()?;
        }

        debug!(records = record_count, "Flushed JSON Lines");
        Ok(())
    }

    /// Flush pending records and close the file.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonLinesWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush buffer on drop");
        }
        self.close_active_writer();
    }
}
