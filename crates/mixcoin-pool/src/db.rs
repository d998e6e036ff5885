use std::path::Path;

use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{FailedPayout, PendingRelease, PoolItem, PoolLabel};

/// Persistent pool backing store, sled-backed (pure-Rust, no C dependencies).
///
/// Named trees:
///   receivable / mixing / reserve — escrow addr bytes → bincode(PoolItem)
///   releases — "<release_at>:<escrow_addr>" → bincode(PendingRelease)
///   failed   — "<failed_at>:<escrow_addr>"  → bincode(FailedPayout)
///
/// The in-memory `PoolManager` writes through to this store on every
/// mutation so in-flight chunks survive a restart.
pub struct PoolDb {
    db: sled::Db,
    receivable: sled::Tree,
    mixing: sled::Tree,
    reserve: sled::Tree,
    releases: sled::Tree,
    failed: sled::Tree,
}

fn storage_err(e: sled::Error) -> MixcoinError {
    MixcoinError::Storage(e.to_string())
}

impl PoolDb {
    /// Open or create the pool database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MixcoinError> {
        Self::from_sled(sled::open(path).map_err(storage_err)?)
    }

    /// In-memory database for tests; deleted on drop.
    pub fn open_temporary() -> Result<Self, MixcoinError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_sled(db)
    }

    fn from_sled(db: sled::Db) -> Result<Self, MixcoinError> {
        let receivable = db.open_tree("receivable").map_err(storage_err)?;
        let mixing = db.open_tree("mixing").map_err(storage_err)?;
        let reserve = db.open_tree("reserve").map_err(storage_err)?;
        let releases = db.open_tree("releases").map_err(storage_err)?;
        let failed = db.open_tree("failed").map_err(storage_err)?;
        Ok(Self { db, receivable, mixing, reserve, releases, failed })
    }

    fn tree(&self, label: PoolLabel) -> &sled::Tree {
        match label {
            PoolLabel::Receivable => &self.receivable,
            PoolLabel::Mixing => &self.mixing,
            PoolLabel::Reserve => &self.reserve,
        }
    }

    // ── Pool items ───────────────────────────────────────────────────────────

    pub fn put_item(&self, label: PoolLabel, item: &PoolItem) -> Result<(), MixcoinError> {
        let bytes =
            bincode::serialize(item).map_err(|e| MixcoinError::Serialization(e.to_string()))?;
        self.tree(label)
            .insert(item.key().as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn remove_item(&self, label: PoolLabel, key: &str) -> Result<(), MixcoinError> {
        self.tree(label).remove(key.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn items(&self, label: PoolLabel) -> Result<Vec<PoolItem>, MixcoinError> {
        let mut out = Vec::new();
        for entry in self.tree(label).iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            let item = bincode::deserialize(&bytes)
                .map_err(|e| MixcoinError::Serialization(e.to_string()))?;
            out.push(item);
        }
        Ok(out)
    }

    // ── Scheduled releases ───────────────────────────────────────────────────

    // Keyed by the escrow address, not the output address: output addresses
    // may repeat across chunks, and two randomized delays can land on the
    // same second. Each accepted release must keep its own record.
    fn release_key(release: &PendingRelease) -> Vec<u8> {
        format!("{:020}:{}", release.release_at, release.escrow_addr).into_bytes()
    }

    pub fn put_release(&self, release: &PendingRelease) -> Result<(), MixcoinError> {
        let bytes = bincode::serialize(release)
            .map_err(|e| MixcoinError::Serialization(e.to_string()))?;
        self.releases
            .insert(Self::release_key(release), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn remove_release(&self, release: &PendingRelease) -> Result<(), MixcoinError> {
        self.releases
            .remove(Self::release_key(release))
            .map_err(storage_err)?;
        Ok(())
    }

    /// All persisted releases, ordered by release time.
    pub fn releases(&self) -> Result<Vec<PendingRelease>, MixcoinError> {
        let mut out = Vec::new();
        for entry in self.releases.iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            let release = bincode::deserialize(&bytes)
                .map_err(|e| MixcoinError::Serialization(e.to_string()))?;
            out.push(release);
        }
        Ok(out)
    }

    // ── Failed payouts ───────────────────────────────────────────────────────

    pub fn put_failed(&self, payout: &FailedPayout) -> Result<(), MixcoinError> {
        let key = format!("{:020}:{}", payout.failed_at, payout.escrow_addr);
        let bytes = bincode::serialize(payout)
            .map_err(|e| MixcoinError::Serialization(e.to_string()))?;
        self.failed.insert(key.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn failed_payouts(&self) -> Result<Vec<FailedPayout>, MixcoinError> {
        let mut out = Vec::new();
        for entry in self.failed.iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            let payout = bincode::deserialize(&bytes)
                .map_err(|e| MixcoinError::Serialization(e.to_string()))?;
            out.push(payout);
        }
        Ok(out)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), MixcoinError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixcoin_core::types::Utxo;

    fn utxo(addr: &str) -> PoolItem {
        PoolItem::Utxo(Utxo {
            addr: addr.into(),
            amount: 10_000_000,
            txid: "aa".into(),
            vout: 0,
        })
    }

    #[test]
    fn items_round_trip_per_label() {
        let db = PoolDb::open_temporary().unwrap();
        db.put_item(PoolLabel::Mixing, &utxo("m1")).unwrap();
        db.put_item(PoolLabel::Reserve, &utxo("r1")).unwrap();

        assert_eq!(db.items(PoolLabel::Mixing).unwrap().len(), 1);
        assert_eq!(db.items(PoolLabel::Reserve).unwrap().len(), 1);
        assert!(db.items(PoolLabel::Receivable).unwrap().is_empty());

        db.remove_item(PoolLabel::Mixing, "m1").unwrap();
        assert!(db.items(PoolLabel::Mixing).unwrap().is_empty());
    }

    fn release(escrow: &str, out: &str, release_at: i64) -> PendingRelease {
        PendingRelease {
            escrow_addr: escrow.into(),
            out_addr: out.into(),
            release_at,
        }
    }

    #[test]
    fn releases_ordered_by_time() {
        let db = PoolDb::open_temporary().unwrap();
        let late = release("e2", "b", 2_000);
        let early = release("e1", "a", 1_000);
        db.put_release(&late).unwrap();
        db.put_release(&early).unwrap();

        let all = db.releases().unwrap();
        assert_eq!(all, vec![early.clone(), late]);

        db.remove_release(&early).unwrap();
        assert_eq!(db.releases().unwrap().len(), 1);
    }

    #[test]
    fn releases_sharing_out_addr_and_second_are_kept_apart() {
        let db = PoolDb::open_temporary().unwrap();
        // Two chunks paying the same output address, delays landing on the
        // same second. Each keeps its own record under its escrow address.
        let first = release("escrow-1", "same-addr", 1_000);
        let second = release("escrow-2", "same-addr", 1_000);
        db.put_release(&first).unwrap();
        db.put_release(&second).unwrap();
        assert_eq!(db.releases().unwrap().len(), 2);

        // Dispatching one must not clear the other.
        db.remove_release(&first).unwrap();
        assert_eq!(db.releases().unwrap(), vec![second]);
    }

    #[test]
    fn failed_payouts_are_kept() {
        let db = PoolDb::open_temporary().unwrap();
        db.put_failed(&FailedPayout {
            escrow_addr: "e1".into(),
            out_addr: "x".into(),
            amount: 10_000_000,
            error: "wallet locked".into(),
            failed_at: 123,
        })
        .unwrap();
        assert_eq!(db.failed_payouts().unwrap().len(), 1);
    }
}
