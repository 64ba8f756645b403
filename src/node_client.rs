/// Node Client - Bitcoin Core JSON-RPC adapter
///
/// The core consumes the chain through this capability: tip, hash-at-height,
/// and full blocks with per-input prevout addresses (getblock verbosity 3).
/// Addresses come from the node; the core never reconstructs them from
/// scripts. Calls are blocking and carry a per-call timeout; the service
/// loop wraps them in spawn_blocking.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};

use crate::types::{Block, ChainTip, Transaction, TxInput, TxOutput};

#[derive(Debug, Clone)]
pub struct NodeError {
    pub message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        NodeError {
            message: message.into(),
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "node unavailable: {}", self.message)
    }
}

impl std::error::Error for NodeError {}

/// Capability supplied to the core. Implementations must be cheap to share
/// across threads; every failure is transient from the caller's view.
pub trait NodeClient: Send + Sync {
    fn chain_tip(&self) -> Result<ChainTip, NodeError>;

    /// Hash of the block at a height on the node's active chain, or None
    /// when the height is past the tip.
    fn block_hash_at(&self, height: i32) -> Result<Option<String>, NodeError>;

    fn block_by_hash(&self, hash: &str) -> Result<Block, NodeError>;
}

/// Raw JSON-RPC client over reqwest. The typed wrappers various node
/// bindings ship break on verbosity-3 responses, so requests are built by
/// hand and the response tree is walked explicitly.
pub struct RpcNodeClient {
    client: reqwest::blocking::Client,
    url: String,
    user: String,
    pass: String,
}

impl RpcNodeClient {
    pub fn new(
        url: String,
        user: String,
        pass: String,
        timeout: Duration,
    ) -> Result<Self, NodeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::new(e.to_string()))?;
        Ok(RpcNodeClient {
            client,
            url,
            user,
            pass,
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&json!({
                "jsonrpc": "1.0",
                "id": "tokenblox",
                "method": method,
                "params": params,
            }))
            .send()
            .map_err(|e| NodeError::new(e.to_string()))?;

        let body: Value = response
            .json()
            .map_err(|e| NodeError::new(format!("{} decode: {}", method, e)))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(NodeError::new(format!("{}: {}", method, error)));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| NodeError::new(format!("{}: no result in RPC response", method)))
    }
}

impl NodeClient for RpcNodeClient {
    fn chain_tip(&self) -> Result<ChainTip, NodeError> {
        let height = self
            .call("getblockcount", json!([]))?
            .as_i64()
            .ok_or_else(|| NodeError::new("getblockcount: not a number"))? as i32;
        let hash = self
            .call("getblockhash", json!([height]))?
            .as_str()
            .ok_or_else(|| NodeError::new("getblockhash: not a string"))?
            .to_string();
        Ok(ChainTip { height, hash })
    }

    fn block_hash_at(&self, height: i32) -> Result<Option<String>, NodeError> {
        match self.call("getblockhash", json!([height])) {
            Ok(value) => Ok(value.as_str().map(str::to_owned)),
            // -8: block height out of range
            Err(e) if e.message.contains("-8") || e.message.contains("out of range") => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn block_by_hash(&self, hash: &str) -> Result<Block, NodeError> {
        let result = self.call("getblock", json!([hash, 3]))?;
        parse_block(&result)
    }
}

fn parse_block(result: &Value) -> Result<Block, NodeError> {
    let hash = str_field(result, "hash")?;
    let height = result
        .get("height")
        .and_then(Value::as_i64)
        .ok_or_else(|| NodeError::new("block missing height"))? as i32;
    let time = result
        .get("time")
        .and_then(Value::as_u64)
        .ok_or_else(|| NodeError::new("block missing time"))?;
    // Genesis has no previousblockhash.
    let prev_hash = result
        .get("previousblockhash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let raw_txs = result
        .get("tx")
        .and_then(Value::as_array)
        .ok_or_else(|| NodeError::new("block missing tx array"))?;

    let mut transactions = Vec::with_capacity(raw_txs.len());
    for raw_tx in raw_txs {
        transactions.push(parse_transaction(raw_tx)?);
    }

    Ok(Block {
        height,
        hash,
        prev_hash,
        time,
        transactions,
    })
}

fn parse_transaction(raw: &Value) -> Result<Transaction, NodeError> {
    let txid = str_field(raw, "txid")?;

    let mut inputs = Vec::new();
    for vin in raw.get("vin").and_then(Value::as_array).unwrap_or(&vec![]) {
        if vin.get("coinbase").is_some() {
            inputs.push(TxInput {
                prev_txid: None,
                prev_vout: None,
                address: None,
                coinbase: true,
            });
            continue;
        }
        // Verbosity 3 carries the spent output inline.
        let address = vin
            .pointer("/prevout/scriptPubKey/address")
            .and_then(Value::as_str)
            .map(str::to_owned);
        inputs.push(TxInput {
            prev_txid: vin.get("txid").and_then(Value::as_str).map(str::to_owned),
            prev_vout: vin.get("vout").and_then(Value::as_u64).map(|v| v as u32),
            address,
            coinbase: false,
        });
    }

    let mut outputs = Vec::new();
    for vout in raw.get("vout").and_then(Value::as_array).unwrap_or(&vec![]) {
        let script_hex = vout
            .pointer("/scriptPubKey/hex")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let script = hex::decode(script_hex)
            .map_err(|e| NodeError::new(format!("bad scriptPubKey hex: {}", e)))?;
        let value_btc = vout.get("value").and_then(Value::as_f64).unwrap_or(0.0);
        outputs.push(TxOutput {
            // Display value only; state math never touches sats.
            value_sats: (value_btc * 1e8).round() as u64,
            script,
            address: vout
                .pointer("/scriptPubKey/address")
                .and_then(Value::as_str)
                .map(str::to_owned),
        });
    }

    Ok(Transaction {
        txid,
        inputs,
        outputs,
    })
}

fn str_field(value: &Value, key: &str) -> Result<String, NodeError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| NodeError::new(format!("missing field {}", key)))
}
