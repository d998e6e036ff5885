//! The per-block driver.
//!
//! On each confirmed block: prune expired receivable chunks, harvest
//! confirmed deposits at pending escrow addresses, run the fee decision, and
//! route each chunk to Reserve or to Mixing plus the delay scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use mixcoin_chain::{with_backoff, ChainRpc};
use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{
    Amount, BlockHash, ChunkRequest, Height, MixResponse, PoolItem, PoolLabel, Utxo,
};
use mixcoin_mix::{is_fee, DelayScheduler};
use mixcoin_pool::PoolManager;

use crate::validate::validate_request;
use crate::warrant::WarrantService;

/// Operator policy for the confirmation window and chunk sizing.
#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub min_conf: u32,
    pub max_conf: u32,
    pub chunk_size: Amount,
    pub rpc_attempts: u32,
    pub rpc_retry_base: Duration,
}

impl Default for MixerConfig {
    fn default() -> Self {
        use mixcoin_core::constants::*;
        Self {
            min_conf: DEFAULT_MIN_CONFIRMATIONS,
            max_conf: DEFAULT_MAX_CONFIRMATIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            rpc_attempts: RPC_RETRY_ATTEMPTS,
            rpc_retry_base: Duration::from_millis(RPC_RETRY_BASE_MS),
        }
    }
}

/// Everything the handlers share, constructed once at startup and threaded
/// through explicitly — no process-wide singletons.
pub struct MixerContext {
    pub cfg: MixerConfig,
    pub pool: Arc<PoolManager>,
    pub chain: Arc<dyn ChainRpc>,
    pub scheduler: DelayScheduler,
    pub warrants: WarrantService,
    height: AtomicU64,
    accepting: AtomicBool,
}

impl MixerContext {
    pub fn new(
        cfg: MixerConfig,
        pool: Arc<PoolManager>,
        chain: Arc<dyn ChainRpc>,
        scheduler: DelayScheduler,
        warrants: WarrantService,
        initial_height: Height,
    ) -> Self {
        Self {
            cfg,
            pool,
            chain,
            scheduler,
            warrants,
            height: AtomicU64::new(initial_height),
            accepting: AtomicBool::new(true),
        }
    }

    /// Current height as of the last confirmed block-connected event.
    pub fn height(&self) -> Height {
        self.height.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Refuse new requests from now on; part of the shutdown sequence.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    ctx: Arc<MixerContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<MixerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<MixerContext> {
        &self.ctx
    }

    /// Handle one client chunk request: validate, issue the warrant, and
    /// register the chunk as receivable. The caller gets either a signed
    /// response or a structured rejection — never partial state.
    pub async fn handle_request(
        &self,
        mut req: ChunkRequest,
    ) -> Result<MixResponse, MixcoinError> {
        if !self.ctx.is_accepting() {
            return Err(MixcoinError::ShuttingDown);
        }
        validate_request(&mut req, self.ctx.height())?;

        let (req, warrant) = self.ctx.warrants.issue(req).await?;
        let escrow_addr = req.escrow_addr.clone();
        self.ctx
            .pool
            .put(PoolLabel::Receivable, PoolItem::Chunk(req))?;

        info!(escrow = %escrow_addr, "registered receivable chunk");
        Ok(MixResponse { escrow_addr, warrant })
    }

    /// Drive one confirmed block through the state machine.
    ///
    /// Pruning runs strictly before harvesting so a chunk can never be both
    /// pruned and promoted in the same pass. Scan already removed anything
    /// harvested earlier, so re-observing an address in a later block is a
    /// no-op.
    pub async fn on_block_connected(&self, hash: BlockHash, height: Height) {
        if !self.ctx.is_accepting() {
            return;
        }
        self.ctx.height.store(height, Ordering::SeqCst);
        info!(height, block = %hash, "block connected");

        self.prune(height);
        if let Err(e) = self.harvest(hash, height).await {
            warn!(height, error = %e, "block scan failed; retrying on next block");
        }
    }

    fn prune(&self, height: Height) {
        let result = self.ctx.pool.filter(|item| match item {
            PoolItem::Chunk(c) => height <= c.send_by,
            PoolItem::Utxo(_) => true,
        });
        match result {
            Ok(0) => {}
            Ok(removed) => info!(removed, height, "pruned expired receivable chunks"),
            Err(e) => warn!(error = %e, "prune failed"),
        }
    }

    async fn harvest(&self, hash: BlockHash, height: Height) -> Result<(), MixcoinError> {
        let addrs = self.ctx.pool.receiving_keys();
        if addrs.is_empty() {
            return Ok(());
        }

        let cfg = &self.ctx.cfg;
        let unspent = with_backoff("listunspent", cfg.rpc_attempts, cfg.rpc_retry_base, || {
            let chain = Arc::clone(&self.ctx.chain);
            let addrs = addrs.clone();
            let (min_conf, max_conf) = (cfg.min_conf, cfg.max_conf);
            async move { chain.list_unspent(min_conf, max_conf, &addrs).await }
        })
        .await?;

        let mut received: HashMap<String, Utxo> = HashMap::new();
        for out in unspent {
            if out.amount < cfg.chunk_size {
                warn!(address = %out.address, amount = out.amount, "deposit below chunk size; ignored");
                continue;
            }
            if out.confirmations < u64::from(cfg.min_conf)
                || out.confirmations > u64::from(cfg.max_conf)
            {
                continue;
            }
            received.insert(
                out.address.clone(),
                Utxo {
                    addr: out.address,
                    amount: out.amount,
                    txid: out.txid,
                    vout: out.vout,
                },
            );
        }
        if received.is_empty() {
            return Ok(());
        }

        let matched: Vec<String> = received.keys().cloned().collect();
        let harvested = self.ctx.pool.scan(&matched)?;

        // Scan already removed these chunks from Receivable, so a routing
        // failure must not abort the loop: the remaining chunks would be
        // dropped with their deposits held. Route each chunk independently
        // and return a failed one to Receivable for the next block to retry.
        for item in harvested {
            let PoolItem::Chunk(chunk) = item else {
                continue;
            };
            let Some(utxo) = received.get(&chunk.escrow_addr) else {
                continue;
            };
            if let Err(e) = self.route(&chunk, utxo.clone(), hash, height).await {
                warn!(escrow = %chunk.escrow_addr, error = %e, "routing failed; chunk requeued as receivable");
                if let Err(e) = self.ctx.pool.put(PoolLabel::Receivable, PoolItem::Chunk(chunk)) {
                    error!(error = %e, "could not requeue chunk; deposit needs operator follow-up");
                }
            }
        }
        Ok(())
    }

    async fn route(
        &self,
        chunk: &ChunkRequest,
        utxo: Utxo,
        hash: BlockHash,
        height: Height,
    ) -> Result<(), MixcoinError> {
        if is_fee(chunk.nonce, &hash, chunk.fee_bips) {
            info!(escrow = %chunk.escrow_addr, amount = utxo.amount, "retaining chunk as fee");
            self.ctx.pool.put(PoolLabel::Reserve, PoolItem::Utxo(utxo))?;
            return Ok(());
        }

        self.ctx.pool.put(PoolLabel::Mixing, PoolItem::Utxo(utxo))?;
        if let Err(e) = self.ctx.scheduler.put(chunk, height).await {
            // The deposit stays in Mixing and funds other releases; the
            // client missed their own deadline.
            warn!(escrow = %chunk.escrow_addr, error = %e, "chunk not schedulable");
        }
        Ok(())
    }
}

/// Poll the node for new blocks and feed confirmed block-connected events to
/// the orchestrator. Substitutes for a ZMQ/notification subscription.
pub async fn watch_blocks(
    orch: Arc<Orchestrator>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_seen = orch.context().height();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {
                let chain = Arc::clone(&orch.context().chain);
                match chain.current_height().await {
                    Ok(height) if height > last_seen => match chain.best_block_hash().await {
                        Ok(hash) => {
                            last_seen = height;
                            orch.on_block_connected(hash, height).await;
                        }
                        Err(e) => warn!(error = %e, "best block hash query failed"),
                    },
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "height poll failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::core::async_trait;
    use mixcoin_chain::types::UnspentOutput;
    use mixcoin_core::constants::DEFAULT_CHUNK_SIZE;
    use mixcoin_crypto::ServiceKey;
    use mixcoin_mix::SchedulerConfig;
    use mixcoin_pool::PoolDb;

    struct MockChain {
        unspent: Vec<UnspentOutput>,
    }

    #[async_trait]
    impl ChainRpc for MockChain {
        async fn current_height(&self) -> Result<Height, MixcoinError> {
            Ok(100)
        }

        async fn best_block_hash(&self) -> Result<BlockHash, MixcoinError> {
            Ok(BlockHash::from_bytes([1; 32]))
        }

        async fn new_address(&self) -> Result<String, MixcoinError> {
            Ok("addr".into())
        }

        async fn list_unspent(
            &self,
            _min_conf: u32,
            _max_conf: u32,
            _addresses: &[String],
        ) -> Result<Vec<UnspentOutput>, MixcoinError> {
            Ok(self.unspent.clone())
        }

        async fn send_to_address(
            &self,
            _address: &str,
            _amount: Amount,
        ) -> Result<String, MixcoinError> {
            Ok("txid".into())
        }
    }

    fn chunk(escrow: &str) -> ChunkRequest {
        ChunkRequest {
            nonce: 1,
            fee_bips: 0,
            send_by: 100,
            return_by: 110,
            out_addr: "out".into(),
            escrow_addr: escrow.into(),
        }
    }

    fn deposit(addr: &str) -> UnspentOutput {
        UnspentOutput {
            address: addr.into(),
            amount: DEFAULT_CHUNK_SIZE,
            txid: "tx".into(),
            vout: 0,
            confirmations: 6,
        }
    }

    // Scan removes harvested chunks before routing, so a pool failure while
    // routing one chunk must not abort the pass and drop the rest.
    #[tokio::test]
    async fn routing_failure_does_not_abort_the_harvest_pass() {
        let db = Arc::new(PoolDb::open_temporary().unwrap());
        let pool = Arc::new(PoolManager::new(Arc::clone(&db)));
        pool.put(PoolLabel::Receivable, PoolItem::Chunk(chunk("e1"))).unwrap();
        pool.put(PoolLabel::Receivable, PoolItem::Chunk(chunk("e2"))).unwrap();

        let chain: Arc<dyn ChainRpc> = Arc::new(MockChain {
            unspent: vec![deposit("e1"), deposit("e2")],
        });
        let scheduler = DelayScheduler::spawn(
            SchedulerConfig::default(),
            Arc::clone(&pool),
            Arc::clone(&chain),
            Arc::clone(&db),
            Vec::new(),
        );
        let warrants = WarrantService::new(Arc::new(ServiceKey::generate()), Arc::clone(&chain));
        let ctx = Arc::new(MixerContext::new(
            MixerConfig::default(),
            Arc::clone(&pool),
            chain,
            scheduler,
            warrants,
            100,
        ));
        let orch = Orchestrator::new(ctx);

        // Every pool insertion fails from here on, so routing fails for
        // both harvested chunks.
        pool.shutdown();

        let result = orch.harvest(BlockHash::from_bytes([1; 32]), 100).await;
        assert!(result.is_ok());
        assert!(pool.receiving_keys().is_empty());
    }
}
