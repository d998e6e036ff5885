//! End-to-end flows over a mock chain: request → warrant → deposit →
//! fee decision → mixed payout, plus pruning and idempotent re-scans.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jsonrpsee::core::async_trait;

use mixcoin_chain::types::UnspentOutput;
use mixcoin_chain::ChainRpc;
use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{Amount, BlockHash, ChunkRequest, Height};
use mixcoin_crypto::ServiceKey;
use mixcoin_mix::{DelayScheduler, SchedulerConfig};
use mixcoin_pool::{PoolDb, PoolManager};
use mixcoin_server::{verify_warrant, MixerConfig, MixerContext, Orchestrator, WarrantService};

const CHUNK_SIZE: Amount = 10_000_000;
const OUT_ADDR: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";

#[derive(Default)]
struct MockChain {
    unspent: Mutex<Vec<UnspentOutput>>,
    sent: Mutex<Vec<(String, Amount)>>,
    next_addr: AtomicU32,
}

impl MockChain {
    fn confirm_deposit(&self, escrow: &str, confirmations: u64) {
        self.unspent.lock().unwrap().push(UnspentOutput {
            address: escrow.to_string(),
            amount: CHUNK_SIZE,
            txid: "deposit-tx".into(),
            vout: 0,
            confirmations,
        });
    }

    fn sent(&self) -> Vec<(String, Amount)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn current_height(&self) -> Result<Height, MixcoinError> {
        Ok(0)
    }

    async fn best_block_hash(&self) -> Result<BlockHash, MixcoinError> {
        Ok(BlockHash::from_bytes([0; 32]))
    }

    async fn new_address(&self) -> Result<String, MixcoinError> {
        let n = self.next_addr.fetch_add(1, Ordering::SeqCst);
        Ok(format!("escrow{n}"))
    }

    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<UnspentOutput>, MixcoinError> {
        Ok(self
            .unspent
            .lock()
            .unwrap()
            .iter()
            .filter(|u| {
                addresses.contains(&u.address)
                    && u.confirmations >= u64::from(min_conf)
                    && u.confirmations <= u64::from(max_conf)
            })
            .cloned()
            .collect())
    }

    async fn send_to_address(&self, address: &str, amount: Amount) -> Result<String, MixcoinError> {
        self.sent.lock().unwrap().push((address.to_string(), amount));
        Ok("payout-tx".into())
    }
}

struct Harness {
    chain: Arc<MockChain>,
    orch: Orchestrator,
}

fn harness(initial_height: Height) -> Harness {
    let db = Arc::new(PoolDb::open_temporary().unwrap());
    let pool = Arc::new(PoolManager::new(Arc::clone(&db)));
    let chain = Arc::new(MockChain::default());
    let chain_dyn: Arc<dyn ChainRpc> = Arc::clone(&chain) as Arc<dyn ChainRpc>;

    let scheduler = DelayScheduler::spawn(
        SchedulerConfig {
            block_unit: Duration::from_millis(5),
            dispatch_attempts: 2,
            retry_base: Duration::from_millis(1),
        },
        Arc::clone(&pool),
        Arc::clone(&chain_dyn),
        db,
        Vec::new(),
    );

    let key = Arc::new(ServiceKey::generate());
    let warrants = WarrantService::new(key, Arc::clone(&chain_dyn));

    let cfg = MixerConfig {
        min_conf: 6,
        max_conf: 9999,
        chunk_size: CHUNK_SIZE,
        rpc_attempts: 2,
        rpc_retry_base: Duration::from_millis(1),
    };
    let ctx = Arc::new(MixerContext::new(
        cfg,
        pool,
        chain_dyn,
        scheduler,
        warrants,
        initial_height,
    ));
    Harness { chain, orch: Orchestrator::new(ctx) }
}

fn request(nonce: i64, fee_bips: u16) -> ChunkRequest {
    ChunkRequest {
        nonce,
        fee_bips,
        send_by: 100,
        return_by: 110,
        out_addr: OUT_ADDR.into(),
        escrow_addr: String::new(),
    }
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn request_yields_a_verifiable_warrant() {
    let h = harness(90);
    let response = h.orch.handle_request(request(1, 0)).await.unwrap();
    assert!(!response.escrow_addr.is_empty());

    // Reconstruct what the service signed and verify.
    let mut signed = request(1, 0);
    signed.escrow_addr = response.escrow_addr.clone();
    let pubkey = h.orch.context().warrants.public_key();
    assert!(verify_warrant(pubkey, &signed, &response.warrant));

    // Any single mutated field breaks the warrant.
    let mut mutated = signed.clone();
    mutated.out_addr = "1CounterpartyXXXXXXXXXXXXXXXXUWLpVr".into();
    assert!(!verify_warrant(pubkey, &mutated, &response.warrant));

    let mut mutated = signed.clone();
    mutated.fee_bips = 1;
    assert!(!verify_warrant(pubkey, &mutated, &response.warrant));

    // And the escrow address appears in the receivable snapshot exactly once.
    let keys = h.orch.context().pool.receiving_keys();
    assert_eq!(
        keys.iter().filter(|k| **k == signed.escrow_addr).count(),
        1
    );
}

#[tokio::test]
async fn confirmed_deposit_is_mixed_and_paid_out() {
    let h = harness(90);
    let response = h.orch.handle_request(request(1, 0)).await.unwrap();
    h.chain.confirm_deposit(&response.escrow_addr, 6);

    // fee_bips = 0 never retains, so the chunk must route to Mixing and a
    // payout to the declared output address must follow within the delay
    // bound [0, 110 − 95 − 1] blocks.
    h.orch
        .on_block_connected(BlockHash::from_bytes([7; 32]), 95)
        .await;

    assert!(h.orch.context().pool.receiving_keys().is_empty());
    wait_until(|| !h.chain.sent().is_empty()).await;
    assert_eq!(h.chain.sent(), vec![(OUT_ADDR.to_string(), CHUNK_SIZE)]);
}

#[tokio::test]
async fn full_fee_rate_routes_to_reserve() {
    let h = harness(90);
    let response = h.orch.handle_request(request(1, 10_000)).await.unwrap();
    h.chain.confirm_deposit(&response.escrow_addr, 6);

    h.orch
        .on_block_connected(BlockHash::from_bytes([7; 32]), 95)
        .await;

    let counts = h.orch.context().pool.counts();
    assert_eq!(counts.reserve, 1);
    assert_eq!(counts.mixing, 0);

    // Retained chunks are never paid out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.chain.sent().is_empty());
}

#[tokio::test]
async fn unconfirmed_deposit_is_not_harvested() {
    let h = harness(90);
    let response = h.orch.handle_request(request(1, 0)).await.unwrap();
    h.chain.confirm_deposit(&response.escrow_addr, 3); // below min_conf

    h.orch
        .on_block_connected(BlockHash::from_bytes([7; 32]), 95)
        .await;

    // Still receivable, not promoted.
    assert_eq!(h.orch.context().pool.counts().receivable, 1);
}

#[tokio::test]
async fn missed_send_by_deadline_prunes_the_chunk() {
    let h = harness(90);
    let response = h.orch.handle_request(request(1, 0)).await.unwrap();

    // No deposit arrives. The first block past send_by prunes the entry.
    h.orch
        .on_block_connected(BlockHash::from_bytes([9; 32]), 101)
        .await;

    let keys = h.orch.context().pool.receiving_keys();
    assert!(!keys.contains(&response.escrow_addr));
    assert!(keys.is_empty());
}

#[tokio::test]
async fn rescanning_a_harvested_address_is_a_noop() {
    let h = harness(90);
    let response = h.orch.handle_request(request(1, 0)).await.unwrap();
    h.chain.confirm_deposit(&response.escrow_addr, 6);

    h.orch
        .on_block_connected(BlockHash::from_bytes([7; 32]), 95)
        .await;
    wait_until(|| !h.chain.sent().is_empty()).await;

    // The deposit is still reported by the node in the next block, but the
    // chunk was already harvested; nothing is double-processed.
    h.orch
        .on_block_connected(BlockHash::from_bytes([8; 32]), 96)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.chain.sent().len(), 1);
    assert_eq!(h.orch.context().pool.counts().mixing, 0);
}

#[tokio::test]
async fn requests_are_refused_once_shutdown_begins() {
    let h = harness(90);
    h.orch.context().stop_accepting();
    let err = h.orch.handle_request(request(1, 0)).await;
    assert!(matches!(err, Err(MixcoinError::ShuttingDown)));
}
