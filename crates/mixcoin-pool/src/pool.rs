use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use tracing::debug;

use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{PoolItem, PoolLabel, Utxo};

use crate::db::PoolDb;

/// Per-label item counts, exposed for operational stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
    pub receivable: usize,
    pub mixing: usize,
    pub reserve: usize,
}

struct Inner {
    pools: HashMap<PoolLabel, HashMap<String, PoolItem>>,
    open: bool,
}

/// Concurrency-safe pool storage, partitioned by label and keyed by escrow
/// address.
///
/// One mutex is the whole exclusion domain: request handlers, the block
/// scanner and the scheduler all take it for short critical sections, which
/// is plenty at the request rates a mixer sees. Every mutation writes
/// through to the sled-backed [`PoolDb`] so a restart can rebuild the pools.
///
/// Membership is exclusive: an escrow address lives under at most one label
/// at a time.
pub struct PoolManager {
    inner: Mutex<Inner>,
    db: Arc<PoolDb>,
}

impl PoolManager {
    pub fn new(db: Arc<PoolDb>) -> Self {
        let pools = PoolLabel::ALL
            .iter()
            .map(|l| (*l, HashMap::new()))
            .collect();
        Self {
            inner: Mutex::new(Inner { pools, open: true }),
            db,
        }
    }

    /// Reload all pools from the backing store. Returns the number of items
    /// restored. Called once at startup, before any concurrent access.
    pub fn bootstrap(&self) -> Result<usize, MixcoinError> {
        let mut inner = self.lock();
        let mut restored = 0;
        for label in PoolLabel::ALL {
            let items = self.db.items(label)?;
            let pool = inner.pools.get_mut(&label).expect("all labels present");
            for item in items {
                pool.insert(item.key().to_string(), item);
                restored += 1;
            }
        }
        Ok(restored)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning only happens if a holder panicked; the pool data is
        // still consistent, so keep serving.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert (or overwrite) `item` under its derived key.
    ///
    /// Enforces exclusive membership: the key is removed from every other
    /// label first.
    pub fn put(&self, label: PoolLabel, item: PoolItem) -> Result<(), MixcoinError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(MixcoinError::ShuttingDown);
        }
        let key = item.key().to_string();
        for other in PoolLabel::ALL {
            if other != label {
                if inner
                    .pools
                    .get_mut(&other)
                    .expect("all labels present")
                    .remove(&key)
                    .is_some()
                {
                    self.db.remove_item(other, &key)?;
                }
            }
        }
        self.db.put_item(label, &item)?;
        inner
            .pools
            .get_mut(&label)
            .expect("all labels present")
            .insert(key, item);
        Ok(())
    }

    /// Atomically remove and return Receivable items matching `addresses`.
    ///
    /// Unmatched addresses are skipped silently; a repeated scan with the
    /// same addresses returns nothing, which is what makes re-observing an
    /// already-harvested deposit a no-op.
    pub fn scan(&self, addresses: &[String]) -> Result<Vec<PoolItem>, MixcoinError> {
        let mut inner = self.lock();
        let pool = inner
            .pools
            .get_mut(&PoolLabel::Receivable)
            .expect("all labels present");
        let mut harvested = Vec::new();
        for addr in addresses {
            if let Some(item) = pool.remove(addr) {
                self.db.remove_item(PoolLabel::Receivable, addr)?;
                harvested.push(item);
            }
        }
        Ok(harvested)
    }

    /// Remove items for which `pred` returns false, across all managed
    /// pools. Returns the number removed.
    pub fn filter<F>(&self, pred: F) -> Result<usize, MixcoinError>
    where
        F: Fn(&PoolItem) -> bool,
    {
        let mut inner = self.lock();
        let mut removed = 0;
        for label in PoolLabel::ALL {
            let pool = inner.pools.get_mut(&label).expect("all labels present");
            let expired: Vec<String> = pool
                .iter()
                .filter(|(_, item)| !pred(item))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                pool.remove(&key);
                self.db.remove_item(label, &key)?;
                debug!(%key, %label, "filtered pool item");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Snapshot of all escrow addresses currently awaiting a deposit.
    pub fn receiving_keys(&self) -> Vec<String> {
        let inner = self.lock();
        inner
            .pools
            .get(&PoolLabel::Receivable)
            .expect("all labels present")
            .keys()
            .cloned()
            .collect()
    }

    /// Remove and return one uniformly chosen utxo from the Mixing pool.
    ///
    /// Payouts are funded from a random mixed deposit rather than the
    /// chunk's own escrow utxo; that indirection is the mixing.
    pub fn take_mixing(&self) -> Result<Option<Utxo>, MixcoinError> {
        let mut inner = self.lock();
        let pool = inner
            .pools
            .get_mut(&PoolLabel::Mixing)
            .expect("all labels present");
        if pool.is_empty() {
            return Ok(None);
        }
        let idx = rand::thread_rng().gen_range(0..pool.len());
        let key = pool.keys().nth(idx).cloned().expect("index in range");
        let item = pool.remove(&key).expect("key just seen");
        self.db.remove_item(PoolLabel::Mixing, &key)?;
        match item {
            PoolItem::Utxo(u) => Ok(Some(u)),
            PoolItem::Chunk(_) => Ok(None),
        }
    }

    pub fn counts(&self) -> PoolCounts {
        let inner = self.lock();
        PoolCounts {
            receivable: inner.pools[&PoolLabel::Receivable].len(),
            mixing: inner.pools[&PoolLabel::Mixing].len(),
            reserve: inner.pools[&PoolLabel::Reserve].len(),
        }
    }

    /// Stop accepting new items. In-flight scan/filter calls complete
    /// normally; subsequent `put` calls fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.open = false;
    }
}
