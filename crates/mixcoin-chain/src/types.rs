use serde::{Deserialize, Serialize};

use mixcoin_core::types::{Amount, BlockHash, Height};

/// One unspent output as reported by `listunspent`, already converted to
/// satoshi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub address: String,
    pub amount: Amount,
    pub txid: String,
    pub vout: u32,
    pub confirmations: u64,
}

/// A confirmed block-connected notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEvent {
    pub hash: BlockHash,
    pub height: Height,
}
