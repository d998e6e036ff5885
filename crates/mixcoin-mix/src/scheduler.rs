//! The delay scheduler.
//!
//! Hides timing correlation between deposit and payout: each accepted chunk
//! waits an independently randomized number of height-units (approximated
//! with a fixed wall-clock unit per block) before its payout is dispatched.
//!
//! One scheduling loop owns a priority queue keyed on release time. Enqueues
//! arrive over a channel, so neither request ingestion nor block processing
//! ever waits on a sleeping release, and shutdown draining is deterministic:
//! the loop hands back whatever is still queued. Releases are persisted at
//! enqueue time and removed only after a successful dispatch, so a crash in
//! between cannot lose one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use mixcoin_chain::{with_backoff, ChainRpc};
use mixcoin_core::constants::{RPC_RETRY_ATTEMPTS, RPC_RETRY_BASE_MS};
use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{ChunkRequest, FailedPayout, Height, PendingRelease};
use mixcoin_pool::{PoolDb, PoolManager};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock approximation of one block.
    pub block_unit: Duration,
    /// Dispatch retry budget before a payout is escalated.
    pub dispatch_attempts: u32,
    pub retry_base: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            block_unit: Duration::from_secs(mixcoin_core::constants::DEFAULT_BLOCK_UNIT_SECS),
            dispatch_attempts: RPC_RETRY_ATTEMPTS,
            retry_base: Duration::from_millis(RPC_RETRY_BASE_MS),
        }
    }
}

struct Entry {
    at: Instant,
    release: PendingRelease,
}

// BinaryHeap is a max-heap; order entries by reversed release time so the
// soonest release is at the top.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Entry {}

enum Cmd {
    Enqueue(Entry),
    Shutdown(oneshot::Sender<Vec<PendingRelease>>),
}

/// Handle to the scheduling loop.
pub struct DelayScheduler {
    tx: mpsc::Sender<Cmd>,
    cfg: SchedulerConfig,
    db: Arc<PoolDb>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DelayScheduler {
    /// Start the scheduling loop. `restored` carries releases persisted by a
    /// previous run; any already past due are dispatched immediately.
    pub fn spawn(
        cfg: SchedulerConfig,
        pool: Arc<PoolManager>,
        chain: Arc<dyn ChainRpc>,
        db: Arc<PoolDb>,
        restored: Vec<PendingRelease>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);

        let mut heap = BinaryHeap::new();
        let now_unix = chrono::Utc::now().timestamp();
        let now = Instant::now();
        for release in restored {
            let at = if release.release_at <= now_unix {
                now
            } else {
                now + Duration::from_secs((release.release_at - now_unix) as u64)
            };
            heap.push(Entry { at, release });
        }
        if !heap.is_empty() {
            info!(restored = heap.len(), "restored scheduled releases");
        }

        let loop_cfg = cfg.clone();
        let loop_db = Arc::clone(&db);
        let task = tokio::spawn(run_loop(loop_cfg, heap, rx, pool, chain, loop_db));
        Self {
            tx,
            cfg,
            db,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Enqueue an accepted chunk for a randomized, deadline-bounded release.
    ///
    /// The delay is drawn uniformly from `[0, return_by − height − 1]`
    /// height-units. A chunk whose `return_by` has already passed is an
    /// upstream validation failure and is rejected here as a last line of
    /// defense.
    pub async fn put(&self, chunk: &ChunkRequest, height: Height) -> Result<(), MixcoinError> {
        if chunk.return_by <= height {
            return Err(MixcoinError::SchedulingInvariant {
                return_by: chunk.return_by,
                height,
            });
        }
        let window = chunk.return_by - height - 1;
        let blocks = if window == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=window)
        };
        let delay = release_delay(self.cfg.block_unit, blocks);

        let release = PendingRelease {
            escrow_addr: chunk.escrow_addr.clone(),
            out_addr: chunk.out_addr.clone(),
            release_at: chrono::Utc::now().timestamp() + delay.as_secs() as i64,
        };
        // Durable before acknowledged: a crash after this point replays the
        // release on restart instead of losing it.
        self.db.put_release(&release)?;

        debug!(
            escrow = %chunk.escrow_addr,
            delay_blocks = blocks,
            window,
            "scheduled mixed release"
        );
        let entry = Entry { at: Instant::now() + delay, release };
        self.tx
            .send(Cmd::Enqueue(entry))
            .await
            .map_err(|_| MixcoinError::ShuttingDown)
    }

    /// Stop the loop and return the releases still pending. They remain
    /// persisted; the next run restores them via [`DelayScheduler::spawn`].
    pub async fn shutdown(&self) -> Vec<PendingRelease> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Cmd::Shutdown(ack_tx)).await.is_err() {
            return Vec::new();
        }
        let pending = ack_rx.await.unwrap_or_default();
        let task = {
            let mut guard = self.task.lock().unwrap_or_else(|p| p.into_inner());
            guard.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        pending
    }
}

/// Wall-clock delay for a drawn block count. Computed in u64 milliseconds
/// and saturated, so an extreme `return_by` cannot wrap the delay short.
fn release_delay(block_unit: Duration, blocks: u64) -> Duration {
    let unit_ms = u64::try_from(block_unit.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(blocks.saturating_mul(unit_ms))
}

async fn run_loop(
    cfg: SchedulerConfig,
    mut heap: BinaryHeap<Entry>,
    mut rx: mpsc::Receiver<Cmd>,
    pool: Arc<PoolManager>,
    chain: Arc<dyn ChainRpc>,
    db: Arc<PoolDb>,
) {
    loop {
        let next = heap.peek().map(|e| e.at);
        tokio::select! {
            _ = async {
                match next {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some(entry) = heap.pop() {
                    dispatch(&cfg, &entry.release, &pool, &chain, &db).await;
                }
            }
            cmd = rx.recv() => match cmd {
                Some(Cmd::Enqueue(entry)) => heap.push(entry),
                Some(Cmd::Shutdown(ack)) => {
                    let pending: Vec<PendingRelease> =
                        heap.into_sorted_vec().into_iter().map(|e| e.release).collect();
                    info!(pending = pending.len(), "scheduler drained");
                    let _ = ack.send(pending);
                    return;
                }
                None => return,
            }
        }
    }
}

/// Send one mixed payout. Exactly one release attempt per acceptance: on
/// persistent failure the payout is recorded durably for the operator, never
/// silently dropped and never retried by a later release.
async fn dispatch(
    cfg: &SchedulerConfig,
    release: &PendingRelease,
    pool: &Arc<PoolManager>,
    chain: &Arc<dyn ChainRpc>,
    db: &Arc<PoolDb>,
) {
    let utxo = match pool.take_mixing() {
        Ok(Some(u)) => u,
        Ok(None) => {
            error!(out_addr = %release.out_addr, "mixing pool empty at release time");
            record_failure(db, release, 0, "mixing pool empty");
            return;
        }
        Err(e) => {
            error!(out_addr = %release.out_addr, error = %e, "pool error at release time");
            record_failure(db, release, 0, &e.to_string());
            return;
        }
    };

    let amount = utxo.amount;
    let result = with_backoff("sendtoaddress", cfg.dispatch_attempts, cfg.retry_base, || {
        let chain = Arc::clone(chain);
        let addr = release.out_addr.clone();
        async move { chain.send_to_address(&addr, amount).await }
    })
    .await;

    match result {
        Ok(txid) => {
            info!(%txid, out_addr = %release.out_addr, amount, "dispatched mixed payout");
            if let Err(e) = db.remove_release(release) {
                warn!(error = %e, "failed to clear dispatched release record");
            }
        }
        Err(e) => {
            error!(
                out_addr = %release.out_addr,
                amount,
                error = %e,
                "payout dispatch exhausted retries; recorded for operator"
            );
            record_failure(db, release, amount, &e.to_string());
        }
    }
}

fn record_failure(db: &PoolDb, release: &PendingRelease, amount: u64, error: &str) {
    let failed = FailedPayout {
        escrow_addr: release.escrow_addr.clone(),
        out_addr: release.out_addr.clone(),
        amount,
        error: error.to_string(),
        failed_at: chrono::Utc::now().timestamp(),
    };
    if let Err(e) = db.put_failed(&failed) {
        error!(error = %e, "failed to persist payout failure record");
    }
    if let Err(e) = db.remove_release(release) {
        warn!(error = %e, "failed to clear failed release record");
    }
}
