use serde::{Deserialize, Serialize};

use mixcoin_core::types::{ChunkRequest, MixResponse};

/// Wire form of a chunk request as submitted over JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcChunkRequest {
    pub nonce: i64,
    pub fee_bips: u16,
    pub send_by: u64,
    pub return_by: u64,
    pub out_addr: String,
    /// Only meaningful for `mixcoin_verifyWarrant`; must be absent on
    /// submission.
    #[serde(default)]
    pub escrow_addr: Option<String>,
}

impl From<RpcChunkRequest> for ChunkRequest {
    fn from(r: RpcChunkRequest) -> Self {
        ChunkRequest {
            nonce: r.nonce,
            fee_bips: r.fee_bips,
            send_by: r.send_by,
            return_by: r.return_by,
            out_addr: r.out_addr,
            escrow_addr: r.escrow_addr.unwrap_or_default(),
        }
    }
}

/// Wire form of an accepted request: the assigned escrow address and the
/// hex-encoded warrant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMixResponse {
    pub escrow_addr: String,
    pub warrant_hex: String,
}

impl From<MixResponse> for RpcMixResponse {
    fn from(r: MixResponse) -> Self {
        RpcMixResponse {
            escrow_addr: r.escrow_addr,
            warrant_hex: r.warrant.to_hex(),
        }
    }
}

/// Operational pool counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcPoolStats {
    pub receivable: usize,
    pub mixing: usize,
    pub reserve: usize,
    pub height: u64,
}
