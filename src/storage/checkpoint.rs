use super::traits::{Storage, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("checkpoint at {location} does not decode: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint would move backwards: last_end_ts {current} -> {proposed}")]
    Regression { current: i64, proposed: i64 },

    #[error("checkpoint range is inverted: start {start} > end {end}")]
    InvertedRange { start: i64, end: i64 },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Last window that was fully handled, as persisted between runs.
///
/// All timestamps are Unix seconds. A zero `last_end_ts` means no tick has
/// completed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_start_ts: i64,
    pub last_end_ts: i64,
    pub last_count: u64,
    pub last_request_ts: i64,
}

impl Checkpoint {
    pub fn is_fresh(&self) -> bool {
        self.last_end_ts == 0
    }
}

/// Read the stored checkpoint without creating or repairing it.
pub async fn read_stored(storage: &dyn Storage) -> Result<Option<Checkpoint>> {
    let Some(bytes) = storage.read_checkpoint().await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CheckpointError::Corrupt {
            location: storage.location(),
            source,
        })
}

/// The single in-memory checkpoint of a running process plus its backend.
///
/// Field updates are serialized under one lock so that readers always see a
/// consistent snapshot. Saves are serialized separately so two callers
/// saving at the same time (a tick finishing and the shutdown path) write
/// whole snapshots one after the other.
pub struct CheckpointStore {
    storage: Arc<dyn Storage>,
    state: Mutex<Checkpoint>,
    save_lock: tokio::sync::Mutex<()>,
}

impl CheckpointStore {
    /// Load the checkpoint, creating a zero-valued one when none exists.
    ///
    /// A stored checkpoint that does not decode is replaced with zero values.
    /// Failing to reach the backend at all is returned to the caller.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let location = storage.location();
        let (checkpoint, rewrite) = match storage.read_checkpoint().await? {
            None => {
                tracing::info!(location = %location, "No checkpoint found, starting fresh");
                (Checkpoint::default(), true)
            }
            Some(bytes) => match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(checkpoint) => {
                    tracing::info!(
                        location = %location,
                        last_start_ts = checkpoint.last_start_ts,
                        last_end_ts = checkpoint.last_end_ts,
                        last_count = checkpoint.last_count,
                        "Loaded checkpoint"
                    );
                    (checkpoint, false)
                }
                Err(e) => {
                    tracing::warn!(
                        location = %location,
                        error = %e,
                        "Checkpoint is corrupt, recreating with zero values"
                    );
                    (Checkpoint::default(), true)
                }
            },
        };

        let store = Self {
            storage,
            state: Mutex::new(checkpoint),
            save_lock: tokio::sync::Mutex::new(()),
        };

        if rewrite {
            store.save().await?;
        }

        Ok(store)
    }

    pub fn location(&self) -> String {
        self.storage.location()
    }

    fn state(&self) -> MutexGuard<'_, Checkpoint> {
        // Updates are single assignments, so a panicked holder cannot leave a torn value
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Checkpoint {
        *self.state()
    }

    pub fn last_start_ts(&self) -> i64 {
        self.state().last_start_ts
    }

    pub fn last_end_ts(&self) -> i64 {
        self.state().last_end_ts
    }

    pub fn last_count(&self) -> u64 {
        self.state().last_count
    }

    pub fn last_request_ts(&self) -> i64 {
        self.state().last_request_ts
    }

    pub fn update_last_start_ts(&self, ts: i64) {
        self.state().last_start_ts = ts;
    }

    pub fn update_last_end_ts(&self, ts: i64) {
        self.state().last_end_ts = ts;
    }

    pub fn update_last_count(&self, count: u64) {
        self.state().last_count = count;
    }

    pub fn update_last_request_ts(&self, ts: i64) {
        self.state().last_request_ts = ts;
    }

    /// Record a completed range in one step.
    ///
    /// Rejects ranges that would move `last_end_ts` backwards or that end
    /// before they start; the stored state is left untouched in that case.
    pub fn advance(&self, start: i64, end: i64, count: u64) -> Result<Checkpoint> {
        if start > end {
            return Err(CheckpointError::InvertedRange { start, end });
        }

        let mut state = self.state();
        if end < state.last_end_ts {
            return Err(CheckpointError::Regression {
                current: state.last_end_ts,
                proposed: end,
            });
        }

        state.last_start_ts = start;
        state.last_end_ts = end;
        state.last_count = count;
        Ok(*state)
    }

    /// Persist the current snapshot. Safe to call any number of times.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.snapshot();
        let bytes = serde_json::to_vec(&snapshot)?;
        self.storage.write_checkpoint(&bytes).await?;
        tracing::debug!(
            location = %self.storage.location(),
            last_end_ts = snapshot.last_end_ts,
            "Checkpoint saved"
        );
        Ok(())
    }
}
