use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height on the backing chain.
pub type Height = u64;

/// Value in satoshi.
pub type Amount = u64;

// ── BlockHash ────────────────────────────────────────────────────────────────

/// 32-byte hash of a confirmed block, delivered with each block-connected
/// event. Feeds the fee decision seed, so it must be the exact consensus hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}…)", &self.to_hex()[..16])
    }
}

// ── Warrant ──────────────────────────────────────────────────────────────────

/// Detached Dilithium2 signature over the canonical request digest.
///
/// Handed to the client at request time; proves the service committed to the
/// exact mixing terms (including the assigned escrow address).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warrant(pub Vec<u8>);

impl Warrant {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }
}

impl fmt::Debug for Warrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Warrant({}b)", self.0.len())
    }
}

/// Dilithium2 public key of the service's long-term warrant key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePubKey(pub Vec<u8>);

impl fmt::Debug for ServicePubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServicePubKey({}b)", self.0.len())
    }
}

// ── ChunkRequest ─────────────────────────────────────────────────────────────

/// A client's mixing terms for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Client-chosen value mixed into the fee decision seed.
    pub nonce: i64,
    /// Fee rate in basis points, 0..=10000.
    pub fee_bips: u16,
    /// Height by which the deposit must confirm; the chunk is discarded after.
    pub send_by: Height,
    /// Height by which the mixed payout must be dispatched.
    pub return_by: Height,
    /// Client-chosen output address for the mixed payout.
    pub out_addr: String,
    /// Escrow address assigned by the service at warrant time; empty until then.
    #[serde(default)]
    pub escrow_addr: String,
}

/// Response to an accepted chunk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixResponse {
    pub escrow_addr: String,
    pub warrant: Warrant,
}

// ── Utxo ─────────────────────────────────────────────────────────────────────

/// A confirmed deposit sitting at an escrow address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub addr: String,
    pub amount: Amount,
    pub txid: String,
    pub vout: u32,
}

// ── Pool ─────────────────────────────────────────────────────────────────────

/// The three managed pools a chunk moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolLabel {
    /// Warrant issued, awaiting deposit confirmation.
    Receivable,
    /// Deposit confirmed, scheduled for mixed payout.
    Mixing,
    /// Retained as service fee.
    Reserve,
}

impl PoolLabel {
    pub const ALL: [PoolLabel; 3] = [PoolLabel::Receivable, PoolLabel::Mixing, PoolLabel::Reserve];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolLabel::Receivable => "receivable",
            PoolLabel::Mixing => "mixing",
            PoolLabel::Reserve => "reserve",
        }
    }
}

impl fmt::Display for PoolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pool entry, keyed by escrow address. Receivable holds requests; Mixing
/// and Reserve hold the confirmed deposits themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolItem {
    Chunk(ChunkRequest),
    Utxo(Utxo),
}

impl PoolItem {
    /// The escrow address this item is stored under.
    pub fn key(&self) -> &str {
        match self {
            PoolItem::Chunk(c) => &c.escrow_addr,
            PoolItem::Utxo(u) => &u.addr,
        }
    }
}

// ── Scheduled releases ───────────────────────────────────────────────────────

/// A payout the scheduler has committed to. Persisted at enqueue time so a
/// restart cannot lose an accepted release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRelease {
    /// Escrow address of the funding chunk. Escrow addresses are issued
    /// fresh per chunk, so this uniquely identifies the release even when
    /// two payouts share an output address and a release second.
    pub escrow_addr: String,
    pub out_addr: String,
    /// Unix timestamp (seconds) at which the payout becomes due.
    pub release_at: i64,
}

/// A payout that exhausted its dispatch retries. Kept durably for operator
/// follow-up; never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayout {
    /// Escrow address of the failed release's funding chunk.
    pub escrow_addr: String,
    pub out_addr: String,
    pub amount: Amount,
    pub error: String,
    pub failed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_hash_hex_round_trip() {
        let h = BlockHash::from_bytes([7u8; 32]);
        assert_eq!(BlockHash::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn block_hash_rejects_short_hex() {
        assert!(BlockHash::from_hex("abcd").is_err());
    }

    #[test]
    fn pool_item_key_is_escrow_address() {
        let chunk = PoolItem::Chunk(ChunkRequest {
            nonce: 1,
            fee_bips: 50,
            send_by: 100,
            return_by: 110,
            out_addr: "out".into(),
            escrow_addr: "escrow".into(),
        });
        assert_eq!(chunk.key(), "escrow");

        let utxo = PoolItem::Utxo(Utxo {
            addr: "escrow".into(),
            amount: 1,
            txid: "tx".into(),
            vout: 0,
        });
        assert_eq!(utxo.key(), "escrow");
    }
}
