use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::{fs as async_fs, task};
use tracing::{debug, info, trace};

mod entry;
mod index;
mod key;
mod store;

use index::CacheIndex;
pub use key::RequestKey;
use key::SlotKey;
use store::CellStore;

/// Result of [`CellCache::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was already cached; only its timestamp moved.
    Refreshed,
    /// The payload now lives in `slot`, displacing `evicted` if that slot was in use.
    Stored {
        slot: usize,
        evicted: Option<RequestKey>,
    },
}

/// Fixed-capacity response cache. Each of the N slots is one file on disk; a new key takes
/// over the least recently used slot.
#[derive(Clone)]
pub struct CellCache {
    state: Arc<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    index: Mutex<CacheIndex>,
    store: CellStore,
    next_temp_id: AtomicU64,
}

impl CellCache {
    pub async fn new(capacity: usize, dir: PathBuf) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| anyhow!("cache capacity must be greater than zero"))?;
        let store = CellStore::new(dir);
        let prepare = {
            let store = store.clone();
            task::spawn_blocking(move || store.prepare(capacity.get()))
        };
        prepare
            .await
            .map_err(|err| anyhow!("cache preparation task failed: {err}"))??;
        info!(
            dir = %store.dir().display(),
            capacity = capacity.get(),
            "cache cells ready"
        );

        let state = Arc::new(CacheState {
            index: Mutex::new(CacheIndex::new(capacity)),
            store,
            next_temp_id: AtomicU64::new(1),
        });
        Ok(Self { state })
    }

    pub fn contains_key(&self, key: &RequestKey) -> bool {
        self.timestamp_of(key).is_some()
    }

    /// Last write or revalidation time of `key`.
    pub fn timestamp_of(&self, key: &RequestKey) -> Option<SystemTime> {
        let slot_key = SlotKey::Request(key.clone());
        self.state
            .index
            .lock()
            .peek(&slot_key)
            .map(|entry| entry.timestamp)
    }

    /// Bumps the timestamp of `key`; returns whether it was cached.
    pub fn refresh(&self, key: &RequestKey) -> bool {
        let slot_key = SlotKey::Request(key.clone());
        self.state.index.lock().refresh(&slot_key).is_some()
    }

    /// Stores `payload` under `key` unless the key is already cached, in which case only the
    /// timestamp is refreshed and the existing payload is kept.
    pub async fn insert(&self, key: &RequestKey, payload: &[u8]) -> Result<InsertOutcome> {
        let slot_key = SlotKey::Request(key.clone());
        if self.state.index.lock().refresh(&slot_key).is_some() {
            trace!(?key, "cache insert refreshed existing entry");
            return Ok(InsertOutcome::Refreshed);
        }

        let temp_id = self.state.next_temp_id.fetch_add(1, Ordering::Relaxed);
        let temp_path = self.state.store.write_temp(temp_id, payload).await?;

        let outcome = self.state.install_payload(slot_key, &temp_path);

        match outcome {
            Ok(Some(stored)) => {
                crate::metrics::record_cache_store();
                if let InsertOutcome::Stored {
                    slot,
                    evicted: Some(evicted),
                } = &stored
                {
                    crate::metrics::record_cache_eviction();
                    debug!(slot, ?evicted, "cache slot reused");
                }
                Ok(stored)
            }
            Ok(None) => {
                let _ = async_fs::remove_file(&temp_path).await;
                Ok(InsertOutcome::Refreshed)
            }
            Err(err) => {
                let _ = async_fs::remove_file(&temp_path).await;
                Err(err)
            }
        }
    }

    /// Payload cached for `key`, read back verbatim from its cell.
    pub async fn get(&self, key: &RequestKey) -> Result<Option<Vec<u8>>> {
        let slot_key = SlotKey::Request(key.clone());
        let file = {
            let index = self.state.index.lock();
            let Some(entry) = index.peek(&slot_key) else {
                return Ok(None);
            };
            // Opened under the lock: a concurrent install renames a new file over the cell,
            // leaving this handle on the payload that belonged to `key`.
            self.state.store.open_cell(entry.slot)?
        };
        let mut payload = Vec::new();
        async_fs::File::from_std(file)
            .read_to_end(&mut payload)
            .await?;
        Ok(Some(payload))
    }

    /// Number of slots holding a cached response.
    pub fn len(&self) -> usize {
        self.state.index.lock().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.index.lock().capacity()
    }
}

impl CacheState {
    /// Moves a finished scratch file into the least recently used cell and hands that cell to
    /// `slot_key`. Returns `None` when the key turned up in the index while the payload was
    /// being written; the existing entry is refreshed instead.
    fn install_payload(
        &self,
        slot_key: SlotKey,
        temp_path: &Path,
    ) -> Result<Option<InsertOutcome>> {
        let mut index = self.index.lock();
        if index.refresh(&slot_key).is_some() {
            return Ok(None);
        }
        let slot = index
            .lru_slot()
            .ok_or_else(|| anyhow!("cache index has no slots"))?;
        self.store.install(temp_path, slot)?;
        let (displaced, entry) = index
            .replace_lru(slot_key)
            .ok_or_else(|| anyhow!("cache index has no slots"))?;
        let evicted = match displaced {
            SlotKey::Request(evicted) => Some(evicted),
            SlotKey::Vacant(_) => None,
        };
        Ok(Some(InsertOutcome::Stored {
            slot: entry.slot,
            evicted,
        }))
    }
}
