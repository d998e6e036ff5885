//! The auditable fee decision.
//!
//! Per confirmed chunk, decide whether to retain it as a fee. The seed
//! combines the client's request-time nonce with the hash of the confirming
//! block: unknown to the client when they commit to their terms, yet
//! recomputable by anyone from public data afterwards, so every retention
//! can be audited against the published algorithm.
//!
//! The nonce and block hash are combined by hashing (BLAKE3) rather than
//! the bitwise OR some earlier mixers used; OR lets a client who saturates
//! the nonce bias the seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mixcoin_core::constants::FEE_BIPS_MAX;
use mixcoin_core::types::BlockHash;

/// Derive the fee decision seed from the chunk nonce and confirming block.
pub fn fee_seed(nonce: i64, block_hash: &BlockHash) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&nonce.to_le_bytes());
    hasher.update(block_hash.as_bytes());
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(seed)
}

/// Pure fee decision: retain the chunk iff a seeded uniform draw in [0,1)
/// falls at or below `fee_bips`·1e-4. Identical inputs always yield the
/// identical outcome.
pub fn is_fee(nonce: i64, block_hash: &BlockHash, fee_bips: u16) -> bool {
    if fee_bips == 0 {
        return false;
    }
    if fee_bips >= FEE_BIPS_MAX {
        return true;
    }
    let mut rng = StdRng::seed_from_u64(fee_seed(nonce, block_hash));
    let draw: f64 = rng.gen();
    draw <= f64::from(fee_bips) * 1.0e-4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> BlockHash {
        BlockHash::from_bytes([byte; 32])
    }

    #[test]
    fn decision_is_pure() {
        for nonce in [0i64, 1, -1, i64::MAX, i64::MIN] {
            for byte in [0u8, 1, 0xff] {
                let first = is_fee(nonce, &hash(byte), 5_000);
                for _ in 0..10 {
                    assert_eq!(is_fee(nonce, &hash(byte), 5_000), first);
                }
            }
        }
    }

    #[test]
    fn zero_fee_rate_never_retains() {
        for byte in 0..=255u8 {
            assert!(!is_fee(byte as i64, &hash(byte), 0));
        }
    }

    #[test]
    fn full_fee_rate_always_retains() {
        for byte in 0..=255u8 {
            assert!(is_fee(byte as i64, &hash(byte), 10_000));
        }
    }

    #[test]
    fn mid_rate_produces_both_outcomes() {
        let outcomes: Vec<bool> = (0..200).map(|n| is_fee(n, &hash(7), 5_000)).collect();
        assert!(outcomes.iter().any(|&o| o));
        assert!(outcomes.iter().any(|&o| !o));
    }

    #[test]
    fn seed_depends_on_both_inputs() {
        assert_ne!(fee_seed(1, &hash(7)), fee_seed(2, &hash(7)));
        assert_ne!(fee_seed(1, &hash(7)), fee_seed(1, &hash(8)));
    }
}
