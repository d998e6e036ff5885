//! Blockchain collaborator surface.
//!
//! The core never talks to bitcoind directly; everything goes through the
//! [`ChainRpc`] trait so tests can substitute a mock chain. The production
//! implementation is [`client::BitcoindClient`].

pub mod client;
pub mod retry;
pub mod types;

use jsonrpsee::core::async_trait;

use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{Amount, BlockHash, Height};

use crate::types::UnspentOutput;

/// Everything the mixer needs from the blockchain node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current best-chain height.
    async fn current_height(&self) -> Result<Height, MixcoinError>;

    /// Hash of the current best block.
    async fn best_block_hash(&self) -> Result<BlockHash, MixcoinError>;

    /// Generate a fresh single-use escrow address from the node wallet.
    async fn new_address(&self) -> Result<String, MixcoinError>;

    /// Unspent outputs at `addresses` with confirmations in
    /// `[min_conf, max_conf]`.
    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<UnspentOutput>, MixcoinError>;

    /// Broadcast a payout. Returns the txid.
    async fn send_to_address(&self, address: &str, amount: Amount) -> Result<String, MixcoinError>;
}

pub use client::BitcoindClient;
pub use retry::with_backoff;
pub use types::BlockEvent;
