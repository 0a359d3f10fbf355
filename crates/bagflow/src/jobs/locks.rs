use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const DEFAULT_SHARDS: usize = 64;

type Slot = Arc<AsyncMutex<()>>;

/// Per-key async mutual exclusion.
///
/// Keys hash onto shards; each shard maps a key to its own async mutex, created
/// on first use and removed when the last holder or waiter lets go. Unrelated
/// keys never wait on each other beyond the brief shard map access.
#[derive(Clone)]
pub struct KeyLocks {
    shards: Arc<[Mutex<HashMap<String, Slot>>]>,
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(n: usize) -> Self {
        let shards: Vec<_> = (0..n.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards: shards.into(),
        }
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let shard = self.shard_for(key);
        let slot = {
            let mut map = self.shards[shard].lock();
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = slot.lock_owned().await;
        KeyGuard {
            locks: self.clone(),
            shard,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn shard_for(&self, key: &str) -> usize {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        (h.finish() as usize) % self.shards.len()
    }
}

pub struct KeyGuard {
    locks: KeyLocks,
    shard: usize,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // release first so the slot's only remaining owners are the map and waiters
        self.guard.take();

        let mut map = self.locks.shards[self.shard].lock();
        if map
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.key);
        }
    }
}
