use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::rpc_types::{RpcChunkRequest, RpcMixResponse, RpcPoolStats};

/// Mixcoin JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "mixcoin_" via `namespace = "mixcoin"`.
#[rpc(server, namespace = "mixcoin")]
pub trait MixcoinApi {
    /// Submit a chunk request. Returns the assigned escrow address and the
    /// service's warrant over the canonical request.
    #[method(name = "requestMix")]
    async fn request_mix(&self, req: RpcChunkRequest) -> RpcResult<RpcMixResponse>;

    /// Verify a warrant against the full request fields (escrow address
    /// included). Audit aid; anyone holding the service key can also verify
    /// offline.
    #[method(name = "verifyWarrant")]
    async fn verify_warrant(
        &self,
        req: RpcChunkRequest,
        warrant_hex: String,
    ) -> RpcResult<bool>;

    /// Hex-encoded Dilithium2 public key warrants are signed with.
    #[method(name = "getServiceKey")]
    async fn get_service_key(&self) -> RpcResult<String>;

    /// Per-label pool counters and the current height.
    #[method(name = "getPoolStats")]
    async fn get_pool_stats(&self) -> RpcResult<RpcPoolStats>;
}
