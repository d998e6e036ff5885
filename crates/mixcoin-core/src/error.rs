use crate::types::Height;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixcoinError {
    // ── Request handling ─────────────────────────────────────────────────────
    #[error("invalid chunk request: {0}")]
    Validation(String),

    #[error("escrow address generation failed: {0}")]
    AddressGeneration(String),

    #[error("warrant signature invalid")]
    Signature,

    #[error("return_by {return_by} has already passed at height {height}")]
    SchedulingInvariant { return_by: Height, height: Height },

    #[error("service is shutting down")]
    ShuttingDown,

    // ── Collaborators ────────────────────────────────────────────────────────
    #[error("blockchain rpc failure: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
