/// Shared test fixtures: canned transactions, deploy records, and direct
/// store seeding. Test-only module.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::keys;
use crate::payload::build_op_return_script;
use crate::processors::Operation;
use crate::store::{encode_balance, RocksDbStore, Store};
use crate::types::{
    Block, DeployRecord, OpPayload, SupplyState, Transaction, TxInput, TxOutput,
};

pub const TEST_BLOCK_HASH: &str =
    "00000000000000000002c0cc73626b56fb3ee1ce605b0ce125cc4fb58775a0a9";

/// Deterministic fake txid derived from the payload and endpoints, so two
/// different test transactions never collide.
fn fake_txid(seed: &[u8]) -> String {
    hex::encode(Sha256::digest(seed))
}

/// Transaction carrying one OP_RETURN output (first) plus standard outputs
/// with the given addresses, funded by inputs with the given addresses.
pub fn op_return_tx(
    payload_json: &str,
    input_addrs: &[Option<&str>],
    output_addrs: &[&str],
) -> Transaction {
    let mut seed = payload_json.as_bytes().to_vec();
    for addr in input_addrs.iter().flatten() {
        seed.extend_from_slice(addr.as_bytes());
    }
    for addr in output_addrs {
        seed.extend_from_slice(addr.as_bytes());
    }

    let mut outputs = vec![TxOutput {
        value_sats: 0,
        script: build_op_return_script(payload_json.as_bytes()),
        address: None,
    }];
    for addr in output_addrs {
        outputs.push(TxOutput {
            value_sats: 546,
            script: vec![0x76, 0xa9, 0x14],
            address: Some(addr.to_string()),
        });
    }

    Transaction {
        txid: fake_txid(&seed),
        inputs: input_addrs
            .iter()
            .map(|addr| TxInput {
                prev_txid: Some("11".repeat(32)),
                prev_vout: Some(0),
                address: addr.map(str::to_owned),
                coinbase: false,
            })
            .collect(),
        outputs,
    }
}

pub fn op_return_tx_with_outputs(payload_json: &str, output_addrs: &[&str]) -> Transaction {
    op_return_tx(payload_json, &[], output_addrs)
}

/// Plain value-moving transaction with no OP_RETURN.
pub fn plain_tx(input_addr: &str, output_addr: &str) -> Transaction {
    let seed = format!("plain:{}:{}", input_addr, output_addr);
    Transaction {
        txid: fake_txid(seed.as_bytes()),
        inputs: vec![TxInput {
            prev_txid: Some("22".repeat(32)),
            prev_vout: Some(0),
            address: Some(input_addr.to_string()),
            coinbase: false,
        }],
        outputs: vec![TxOutput {
            value_sats: 10_000,
            script: vec![0x76, 0xa9, 0x14],
            address: Some(output_addr.to_string()),
        }],
    }
}

pub fn operation<'a>(
    tx: &'a Transaction,
    payload: &'a OpPayload,
    block_height: i32,
    tx_index: u32,
    sub_index: u32,
) -> Operation<'a> {
    Operation {
        payload,
        tx,
        block_height,
        block_hash: TEST_BLOCK_HASH,
        block_time: 1_700_000_000,
        tx_index,
        sub_index,
    }
}

pub fn deploy_record(
    ticker: &str,
    max_supply: u128,
    limit_per_mint: Option<u128>,
    decimals: u8,
) -> DeployRecord {
    DeployRecord {
        ticker: ticker.to_string(),
        max_supply,
        limit_per_mint,
        decimals,
        deployer_address: "addrDeployer".into(),
        deploy_txid: "33".repeat(32),
        deploy_height: 100,
        deploy_tx_index: 0,
        timestamp: 1_700_000_000,
        legacy_validated: true,
        legacy_snapshot: None,
    }
}

pub fn put_deploy(store: &RocksDbStore, record: DeployRecord) {
    let mut batch = store.begin_tx();
    batch.put(
        "deploys",
        record.ticker.as_bytes().to_vec(),
        bincode::serialize(&record).unwrap(),
    );
    batch.put(
        "supplies",
        record.ticker.as_bytes().to_vec(),
        bincode::serialize(&SupplyState::default()).unwrap(),
    );
    store.commit_tx(batch).unwrap();
}

pub fn put_balance(store: &RocksDbStore, address: &str, ticker: &str, amount: u128) {
    let mut batch = store.begin_tx();
    batch.put(
        "balances",
        keys::balance_key(ticker, address),
        encode_balance(amount),
    );
    store.commit_tx(batch).unwrap();
}

pub fn put_supply(store: &RocksDbStore, ticker: &str, supply: SupplyState) {
    let mut batch = store.begin_tx();
    batch.put(
        "supplies",
        ticker.as_bytes().to_vec(),
        bincode::serialize(&supply).unwrap(),
    );
    store.commit_tx(batch).unwrap();
}

/// Chain builder: consecutive blocks with deterministic hashes.
pub fn block_hash(height: i32, salt: &str) -> String {
    hex::encode(Sha256::digest(format!("block:{}:{}", height, salt).as_bytes()))
}

pub fn make_block(
    height: i32,
    prev_hash: &str,
    salt: &str,
    transactions: Vec<Transaction>,
) -> Block {
    Block {
        height,
        hash: block_hash(height, salt),
        prev_hash: prev_hash.to_string(),
        time: 1_700_000_000 + height as u64 * 600,
        transactions,
    }
}

/// Convenience: Arc'd store plus tempdir, mirroring store::test_utils but
/// usable from every test module.
pub fn test_store() -> (Arc<RocksDbStore>, tempfile::TempDir) {
    crate::store::test_utils::create_test_store()
}
