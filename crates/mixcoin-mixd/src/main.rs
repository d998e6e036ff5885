//! mixd — the Mixcoin daemon.
//!
//! Startup sequence:
//!   1. Open (or initialise) the pool database
//!   2. Restore in-flight pool state and scheduled releases
//!   3. Start the delay scheduler and the block watcher
//!   4. Start the client-facing JSON-RPC server
//!   5. On SIGINT: stop accepting → drain scheduler → shut pool → flush db

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use mixcoin_chain::{BitcoindClient, ChainRpc};
use mixcoin_core::constants::{
    DEFAULT_BLOCK_UNIT_SECS, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONFIRMATIONS,
    DEFAULT_MIN_CONFIRMATIONS,
};
use mixcoin_crypto::ServiceKey;
use mixcoin_mix::{DelayScheduler, SchedulerConfig};
use mixcoin_pool::{PoolDb, PoolManager};
use mixcoin_server::{
    watch_blocks, MixerConfig, MixerContext, Orchestrator, RpcServer, WarrantService,
};

#[derive(Parser, Debug)]
#[command(
    name = "mixd",
    version,
    about = "Mixcoin daemon — accountable cryptocurrency mixing"
)]
struct Args {
    /// Directory for the persistent pool database and service key.
    #[arg(long, default_value = "~/.mixcoin/data")]
    data_dir: PathBuf,

    /// Client-facing JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8440")]
    rpc_addr: SocketAddr,

    /// bitcoind JSON-RPC endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8332")]
    bitcoind_url: String,

    /// bitcoind RPC username.
    #[arg(long, default_value = "mixcoin")]
    bitcoind_user: String,

    /// bitcoind RPC password.
    #[arg(long, default_value = "")]
    bitcoind_pass: String,

    /// Minimum deposit confirmations before harvesting.
    #[arg(long, default_value_t = DEFAULT_MIN_CONFIRMATIONS)]
    min_conf: u32,

    /// Maximum deposit confirmations; older deposits are treated as stale.
    #[arg(long, default_value_t = DEFAULT_MAX_CONFIRMATIONS)]
    max_conf: u32,

    /// Chunk denomination in satoshi.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Wall-clock seconds approximating one block, for release delays.
    #[arg(long, default_value_t = DEFAULT_BLOCK_UNIT_SECS)]
    block_unit_secs: u64,

    /// Seconds between best-height polls.
    #[arg(long, default_value_t = 10)]
    poll_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mixcoin=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("mixd starting");

    // ── Pool database ─────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(PoolDb::open(data_dir.join("pool")).context("opening pool database")?);

    let pool = Arc::new(PoolManager::new(Arc::clone(&db)));
    let restored = pool.bootstrap().context("restoring pool state")?;
    if restored > 0 {
        info!(restored, "restored in-flight pool items");
    }

    // ── Service key ───────────────────────────────────────────────────────────
    let key = Arc::new(load_or_generate_service_key(&data_dir)?);
    info!(pubkey_bytes = key.public_key.0.len(), "warrant key loaded");

    // ── Blockchain node ───────────────────────────────────────────────────────
    let chain: Arc<dyn ChainRpc> = Arc::new(BitcoindClient::new(
        &args.bitcoind_url,
        &args.bitcoind_user,
        &args.bitcoind_pass,
    ));
    let initial_height = chain
        .current_height()
        .await
        .context("querying initial blockchain height")?;
    info!(height = initial_height, "connected to bitcoind");

    // ── Scheduler, restored from persisted releases ───────────────────────────
    let pending = db.releases().context("loading persisted releases")?;
    let scheduler = DelayScheduler::spawn(
        SchedulerConfig {
            block_unit: Duration::from_secs(args.block_unit_secs),
            ..SchedulerConfig::default()
        },
        Arc::clone(&pool),
        Arc::clone(&chain),
        Arc::clone(&db),
        pending,
    );

    // ── Mixer context ─────────────────────────────────────────────────────────
    let warrants = WarrantService::new(Arc::clone(&key), Arc::clone(&chain));
    let cfg = MixerConfig {
        min_conf: args.min_conf,
        max_conf: args.max_conf,
        chunk_size: args.chunk_size,
        ..MixerConfig::default()
    };
    let ctx = Arc::new(MixerContext::new(
        cfg,
        Arc::clone(&pool),
        chain,
        scheduler,
        warrants,
        initial_height,
    ));
    let orch = Arc::new(Orchestrator::new(Arc::clone(&ctx)));

    // ── Block watcher ─────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watcher = tokio::spawn(watch_blocks(
        Arc::clone(&orch),
        Duration::from_secs(args.poll_secs),
        shutdown_rx,
    ));

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_handle = RpcServer::new(Arc::clone(&orch))
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    info!("mixd ready");
    tokio::signal::ctrl_c().await.context("waiting for SIGINT")?;

    // ── Shutdown: scheduler drains → pool closes → db flushes ─────────────────
    info!("shutting down");
    ctx.stop_accepting();
    let _ = shutdown_tx.send(true);
    let _ = watcher.await;

    let pending = ctx.scheduler.shutdown().await;
    info!(pending = pending.len(), "scheduler drained; releases persisted");

    pool.shutdown();
    info!("pool shut down");

    db.flush().context("flushing pool database")?;
    info!("database flushed; exiting");

    let _ = rpc_handle.stop();
    Ok(())
}

/// Load the long-term warrant key, or generate and persist one on first run.
///
/// Warrants must remain verifiable across restarts, so an ephemeral key is
/// never acceptable here; the generated key is written to the data directory
/// immediately.
fn load_or_generate_service_key(data_dir: &Path) -> anyhow::Result<ServiceKey> {
    let key_path = data_dir.join("service_key.json");
    if key_path.exists() {
        let json = std::fs::read_to_string(&key_path)
            .with_context(|| format!("reading service key from {}", key_path.display()))?;
        return serde_json::from_str(&json).context("parsing service key JSON");
    }
    warn!(path = %key_path.display(), "no service key found; generating one");
    let key = ServiceKey::generate();
    let json = serde_json::to_string(&key).context("serializing service key")?;
    std::fs::write(&key_path, json)
        .with_context(|| format!("writing service key to {}", key_path.display()))?;
    Ok(key)
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
