use jsonrpsee::core::async_trait;
use serde_json::Value;

use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{Amount, BlockHash, Height};

use crate::types::UnspentOutput;
use crate::ChainRpc;

/// JSON-RPC 1.0 client against a bitcoind node.
///
/// Uses raw HTTP POST with serde_json rather than a full typed client: the
/// handful of wallet calls the mixer needs do not justify one, and bitcoind
/// speaks basic-auth JSON-RPC over plain HTTP.
pub struct BitcoindClient {
    url: String,
    user: String,
    pass: String,
    client: reqwest::Client,
}

impl BitcoindClient {
    pub fn new(url: &str, user: &str, pass: &str) -> Self {
        Self {
            url: url.to_string(),
            user: user.to_string(),
            pass: pass.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: Value) -> Result<Value, MixcoinError> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "method": method,
            "params": params,
            "id": "mixcoin"
        });

        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await
            .map_err(|e| MixcoinError::Rpc(format!("{method}: {e}")))?;

        let json: Value = resp
            .json()
            .await
            .map_err(|e| MixcoinError::Rpc(format!("{method}: invalid response: {e}")))?;

        if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
            return Err(MixcoinError::Rpc(format!("{method}: {err}")));
        }

        Ok(json["result"].clone())
    }
}

/// Convert a bitcoind BTC float into satoshi.
pub fn btc_to_sat(btc: f64) -> Amount {
    (btc * 1e8).round() as Amount
}

/// Convert satoshi into the BTC float bitcoind expects.
pub fn sat_to_btc(sat: Amount) -> f64 {
    sat as f64 / 1e8
}

#[async_trait]
impl ChainRpc for BitcoindClient {
    async fn current_height(&self) -> Result<Height, MixcoinError> {
        let result = self.call("getblockcount", serde_json::json!([])).await?;
        result
            .as_u64()
            .ok_or_else(|| MixcoinError::Rpc("getblockcount: expected integer".into()))
    }

    async fn best_block_hash(&self) -> Result<BlockHash, MixcoinError> {
        let result = self.call("getbestblockhash", serde_json::json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| MixcoinError::Rpc("getbestblockhash: expected string".into()))?;
        BlockHash::from_hex(hex)
            .map_err(|e| MixcoinError::Rpc(format!("getbestblockhash: invalid hex: {e}")))
    }

    async fn new_address(&self) -> Result<String, MixcoinError> {
        let result = self.call("getnewaddress", serde_json::json!([])).await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MixcoinError::Rpc("getnewaddress: expected string".into()))
    }

    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<UnspentOutput>, MixcoinError> {
        let result = self
            .call(
                "listunspent",
                serde_json::json!([min_conf, max_conf, addresses]),
            )
            .await?;

        let entries = result
            .as_array()
            .ok_or_else(|| MixcoinError::Rpc("listunspent: expected array".into()))?;

        let mut outputs = Vec::with_capacity(entries.len());
        for entry in entries {
            let address = entry["address"].as_str().unwrap_or_default().to_string();
            let btc = entry["amount"].as_f64().unwrap_or(0.0);
            let txid = entry["txid"].as_str().unwrap_or_default().to_string();
            let vout = entry["vout"].as_u64().unwrap_or(0) as u32;
            let confirmations = entry["confirmations"].as_u64().unwrap_or(0);
            if address.is_empty() || txid.is_empty() {
                tracing::warn!(?entry, "listunspent entry missing address or txid; skipped");
                continue;
            }
            outputs.push(UnspentOutput {
                address,
                amount: btc_to_sat(btc),
                txid,
                vout,
                confirmations,
            });
        }
        Ok(outputs)
    }

    async fn send_to_address(&self, address: &str, amount: Amount) -> Result<String, MixcoinError> {
        let result = self
            .call(
                "sendtoaddress",
                serde_json::json!([address, sat_to_btc(amount)]),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MixcoinError::Rpc("sendtoaddress: expected txid string".into()))
    }
}
