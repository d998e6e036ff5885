//! Warrant issuance and verification.
//!
//! A warrant is the service's signed commitment to the exact mixing terms a
//! client submitted, escrow address included. If the service later
//! misbehaves, the client publishes the request fields plus the warrant and
//! anyone can check the commitment against the service's public key.

use std::sync::Arc;

use tracing::debug;

use mixcoin_chain::ChainRpc;
use mixcoin_core::canonical::warrant_digest;
use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{ChunkRequest, ServicePubKey, Warrant};
use mixcoin_crypto::ServiceKey;

pub struct WarrantService {
    key: Arc<ServiceKey>,
    chain: Arc<dyn ChainRpc>,
}

impl WarrantService {
    pub fn new(key: Arc<ServiceKey>, chain: Arc<dyn ChainRpc>) -> Self {
        Self { key, chain }
    }

    pub fn public_key(&self) -> &ServicePubKey {
        &self.key.public_key
    }

    /// Assign a fresh single-use escrow address to a validated request and
    /// sign the canonical encoding of the result.
    ///
    /// Address generation failure aborts this request only, not the service.
    pub async fn issue(
        &self,
        mut req: ChunkRequest,
    ) -> Result<(ChunkRequest, Warrant), MixcoinError> {
        let escrow = self
            .chain
            .new_address()
            .await
            .map_err(|e| MixcoinError::AddressGeneration(e.to_string()))?;
        req.escrow_addr = escrow;

        let digest = warrant_digest(&req);
        let warrant = self.key.sign(&digest);
        debug!(escrow = %req.escrow_addr, "issued warrant");
        Ok((req, warrant))
    }
}

/// Third-party warrant check: recompute the canonical digest from the stored
/// request fields and verify the signature against the service key.
pub fn verify_warrant(pubkey: &ServicePubKey, req: &ChunkRequest, warrant: &Warrant) -> bool {
    let digest = warrant_digest(req);
    mixcoin_crypto::verify_signature(pubkey, &digest, warrant).is_ok()
}
