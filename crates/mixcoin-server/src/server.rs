use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tracing::info;

use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::Warrant;

use crate::api::MixcoinApiServer;
use crate::orchestrator::Orchestrator;
use crate::rpc_types::{RpcChunkRequest, RpcMixResponse, RpcPoolStats};
use crate::warrant::verify_warrant;

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn map_err(e: MixcoinError) -> ErrorObject<'static> {
    match e {
        MixcoinError::Validation(_) | MixcoinError::SchedulingInvariant { .. } => {
            rpc_err(-32602, e.to_string())
        }
        MixcoinError::ShuttingDown => rpc_err(-32001, e.to_string()),
        _ => rpc_err(-32603, e.to_string()),
    }
}

/// The client-facing RPC server.
pub struct RpcServer {
    orch: Arc<Orchestrator>,
}

impl RpcServer {
    pub fn new(orch: Arc<Orchestrator>) -> Self {
        Self { orch }
    }

    /// Start the JSON-RPC server on `addr`. Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let server = Server::builder().build(addr).await?;
        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl MixcoinApiServer for RpcServer {
    async fn request_mix(&self, req: RpcChunkRequest) -> RpcResult<RpcMixResponse> {
        let response = self
            .orch
            .handle_request(req.into())
            .await
            .map_err(map_err)?;
        Ok(response.into())
    }

    async fn verify_warrant(
        &self,
        req: RpcChunkRequest,
        warrant_hex: String,
    ) -> RpcResult<bool> {
        let warrant = Warrant::from_hex(&warrant_hex)
            .map_err(|e| rpc_err(-32602, format!("invalid warrant hex: {e}")))?;
        let pubkey = self.orch.context().warrants.public_key();
        Ok(verify_warrant(pubkey, &req.into(), &warrant))
    }

    async fn get_service_key(&self) -> RpcResult<String> {
        Ok(hex::encode(&self.orch.context().warrants.public_key().0))
    }

    async fn get_pool_stats(&self) -> RpcResult<RpcPoolStats> {
        let ctx = self.orch.context();
        let counts = ctx.pool.counts();
        Ok(RpcPoolStats {
            receivable: counts.receivable,
            mixing: counts.mixing,
            reserve: counts.reserve,
            height: ctx.height(),
        })
    }
}
