//! Durable key-value storage for `DailyPriceState`.
//!
//! One JSON document per key (`{dir}/{key}.state.json`). Saves write a
//! sibling temp file, fsync it and rename over the target, so a crash leaves
//! either the old or the new document, never a torn one.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tms_core::DailyPriceState;
use tracing::debug;

use crate::error::{PersistenceError, PersistenceResult};

/// Single-writer store for per-symbol daily state.
pub trait StateStore: Send + Sync {
    /// Load the state for `key`, `None` if never saved.
    fn load(&self, key: &str) -> PersistenceResult<Option<DailyPriceState>>;

    /// Durably save the state for `key`. Complete when this returns.
    fn save(&self, key: &str, state: &DailyPriceState) -> PersistenceResult<()>;
}

fn validate_key(key: &str) -> PersistenceResult<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !key.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

/// File-backed store with atomic replace.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.state.json"))
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self, key: &str) -> PersistenceResult<Option<DailyPriceState>> {
        validate_key(key)?;
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&bytes)?;
        debug!(key, path = %path.display(), "Loaded daily state");
        Ok(Some(state))
    }

    fn save(&self, key: &str, state: &DailyPriceState) -> PersistenceResult<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.state.json.tmp"));

        let json = serde_json::to_vec_pretty(state)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(key, date = %state.trading_date, "Saved daily state");
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, DailyPriceState>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key, as if saved by an earlier process.
    pub fn with_state(self, key: &str, state: DailyPriceState) -> Self {
        self.states.lock().insert(key.to_string(), state);
        self
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> PersistenceResult<Option<DailyPriceState>> {
        validate_key(key)?;
        Ok(self.states.lock().get(key).cloned())
    }

    fn save(&self, key: &str, state: &DailyPriceState) -> PersistenceResult<()> {
        validate_key(key)?;
        self.states.lock().insert(key.to_string(), state.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
