//! Canonical warrant encoding.
//!
//! The warrant is a signature over a digest of the full request, escrow
//! address included. Any third party holding the stored fields must be able
//! to recompute the exact same digest, so the encoding is defined over field
//! *names*, not struct order: fields are serialized as a JSON object with
//! keys in lexicographic order.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::ChunkRequest;

/// Serialize a request (with its assigned escrow address) into canonical
/// bytes. Stable regardless of how the caller ordered the fields.
pub fn canonical_request_bytes(req: &ChunkRequest) -> Vec<u8> {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("nonce", req.nonce.into());
    fields.insert("fee_bips", req.fee_bips.into());
    fields.insert("send_by", req.send_by.into());
    fields.insert("return_by", req.return_by.into());
    fields.insert("out_addr", req.out_addr.clone().into());
    fields.insert("escrow_addr", req.escrow_addr.clone().into());
    serde_json::to_vec(&fields).expect("JSON map of scalars always serializes")
}

/// BLAKE3 digest of the canonical request bytes — the message the warrant
/// signs.
pub fn warrant_digest(req: &ChunkRequest) -> [u8; 32] {
    *blake3::hash(&canonical_request_bytes(req)).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChunkRequest {
        ChunkRequest {
            nonce: 42,
            fee_bips: 100,
            send_by: 500,
            return_by: 520,
            out_addr: "1OutAddr".into(),
            escrow_addr: "1EscrowAddr".into(),
        }
    }

    #[test]
    fn digest_is_stable_across_clones() {
        let a = sample();
        let b = a.clone();
        assert_eq!(warrant_digest(&a), warrant_digest(&b));
    }

    #[test]
    fn keys_appear_in_lexicographic_order() {
        let bytes = canonical_request_bytes(&sample());
        let text = String::from_utf8(bytes).unwrap();
        let positions: Vec<usize> = ["escrow_addr", "fee_bips", "nonce", "out_addr", "return_by", "send_by"]
            .iter()
            .map(|k| text.find(&format!("\"{k}\"")).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn every_field_mutation_changes_the_digest() {
        let base = sample();
        let digest = warrant_digest(&base);

        let mut m = base.clone();
        m.nonce = 43;
        assert_ne!(warrant_digest(&m), digest);

        let mut m = base.clone();
        m.fee_bips = 101;
        assert_ne!(warrant_digest(&m), digest);

        let mut m = base.clone();
        m.send_by = 501;
        assert_ne!(warrant_digest(&m), digest);

        let mut m = base.clone();
        m.return_by = 521;
        assert_ne!(warrant_digest(&m), digest);

        let mut m = base.clone();
        m.out_addr = "1Other".into();
        assert_ne!(warrant_digest(&m), digest);

        let mut m = base;
        m.escrow_addr = "1OtherEscrow".into();
        assert_ne!(warrant_digest(&m), digest);
    }
}
