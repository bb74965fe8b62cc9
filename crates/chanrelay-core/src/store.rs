//! Durable state file: the forwarding configuration plus the dedup watermark.
//!
//! Layout (JSON): `source_channel`, `destinations`, `mode`, `order`,
//! `cron_schedule`, `allowed_window`, `pacing_seconds`, `timezone`,
//! `last_forwarded_id` (nullable).
//!
//! The watermark is written through synchronously after each delivered batch,
//! never batched lazily, so a crash re-sends at most the in-flight unsaved
//! portion.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{domain::MessageId, state::ForwardConfig, Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedState {
    #[serde(flatten)]
    config: ForwardConfig,
    last_forwarded_id: Option<MessageId>,
}

pub struct StateStore {
    path: PathBuf,
    persisted: Mutex<PersistedState>,
}

impl StateStore {
    /// Load the state file, creating it with defaults if missing.
    ///
    /// A file that exists but cannot be parsed is a `Persistence` error: we
    /// refuse to guess and overwrite operator state.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let persisted = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<PersistedState>(&raw).map_err(|e| {
                Error::Persistence(format!("corrupt state file {}: {e}", path.display()))
            })?
        } else {
            tracing::warn!(path = %path.display(), "state file not found, writing defaults");
            let state = PersistedState {
                config: ForwardConfig::default(),
                last_forwarded_id: None,
            };
            write_file(&path, &state)?;
            state
        };

        persisted.config.validate()?;

        Ok(Self {
            path,
            persisted: Mutex::new(persisted),
        })
    }

    pub fn config(&self) -> ForwardConfig {
        self.lock().config.clone()
    }

    pub fn watermark(&self) -> Option<MessageId> {
        self.lock().last_forwarded_id
    }

    /// Persist a replaced configuration; the stored watermark is kept.
    pub fn save_config(&self, config: &ForwardConfig) -> Result<()> {
        let mut state = self.lock();
        state.config = config.clone();
        write_file(&self.path, &state)
    }

    /// Persist the watermark. Monotonically non-decreasing: a stale id is
    /// ignored rather than written.
    pub fn save_watermark(&self, id: MessageId) -> Result<()> {
        let mut state = self.lock();
        if state.last_forwarded_id.is_some_and(|prev| prev >= id) {
            return Ok(());
        }
        tracing::debug!(watermark = id.0, "persisting watermark");
        state.last_forwarded_id = Some(id);
        write_file(&self.path, &state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PersistedState> {
        self.persisted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn write_file(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json)
        .map_err(|e| Error::Persistence(format!("cannot write {}: {e}", path.display())))
}
