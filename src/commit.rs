/// Commit Engine
///
/// Applies a commit plan to the store as one transactional unit: balances,
/// deploys, supplies, log entries, the processed-block row, and the indexed
/// tip all land in a single atomic batch. Every invariant is re-checked
/// against committed state here, independently of processor validation; any
/// violation aborts with nothing written.
///
/// The plan itself (with assigned log ids) is persisted inside the
/// processed-block row, checksummed, so the reorg handler can later apply
/// its exact inverse.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::constants::{KEY_INDEXED_TIP, KEY_OP_LOG_NEXT_ID};
use crate::keys;
use crate::metrics;
use crate::store::{decode_balance, encode_balance, read_next_log_id, Store, StoreBatch, StoreError};
use crate::types::{
    ChainTip, CommitPlan, ErrorCode, IndexError, ProcessedBlock, SupplyState,
};

pub struct CommitEngine {
    store: Arc<dyn Store>,
}

impl CommitEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        CommitEngine { store }
    }

    /// Commit one block's plan. On success the indexed tip has advanced and
    /// the returned record is what reorg rollback will read back.
    pub fn commit_block(&self, mut plan: CommitPlan) -> Result<ProcessedBlock, IndexError> {
        let timer = metrics::COMMIT_LATENCY.start_timer();
        let store = self.store.as_ref();
        let mut batch = store.begin_tx();

        self.apply_balances(store, &mut batch, &plan)?;
        self.apply_deploys(store, &mut batch, &plan)?;
        self.apply_supplies(store, &mut batch, &plan)?;
        self.assign_and_append_log(store, &mut batch, &mut plan)?;

        let checksum = plan_checksum(&plan);
        let processed = ProcessedBlock {
            height: plan.height,
            hash: plan.hash.clone(),
            prev_hash: plan.prev_hash.clone(),
            commit_checksum: checksum,
            committed_at: unix_now(),
            plan,
        };

        let encoded = bincode::serialize(&processed)
            .map_err(|e| store_abort(StoreError::from(e)))?;
        batch.put(
            "processed_blocks",
            keys::processed_block_key(processed.height),
            encoded,
        );

        let tip = ChainTip {
            height: processed.height,
            hash: processed.hash.clone(),
        };
        let tip_bytes =
            bincode::serialize(&tip).map_err(|e| store_abort(StoreError::from(e)))?;
        batch.put("chain_state", KEY_INDEXED_TIP.to_vec(), tip_bytes);

        store.commit_tx(batch).map_err(store_abort)?;
        timer.observe_duration();
        metrics::BLOCKS_COMMITTED.inc();
        metrics::INDEXED_TIP_HEIGHT.set(processed.height as i64);
        Ok(processed)
    }

    fn apply_balances(
        &self,
        store: &dyn Store,
        batch: &mut StoreBatch,
        plan: &CommitPlan,
    ) -> Result<(), IndexError> {
        for ((address, ticker), delta) in &plan.balance_deltas {
            let key = keys::balance_key(ticker, address);
            let current = match batch
                .get_through(store, "balances", &key)
                .map_err(store_abort)?
            {
                Some(bytes) => decode_balance(&bytes).map_err(store_abort)? as i128,
                None => 0,
            };
            let next = current.checked_add(*delta).ok_or_else(|| {
                store_abort(StoreError::new("balance overflow at commit"))
            })?;
            if next < 0 {
                return Err(store_abort(StoreError::new(format!(
                    "balance for ({}, {}) would go negative",
                    address, ticker
                ))));
            }
            batch.put("balances", key, encode_balance(next as u128));
        }
        Ok(())
    }

    fn apply_deploys(
        &self,
        store: &dyn Store,
        batch: &mut StoreBatch,
        plan: &CommitPlan,
    ) -> Result<(), IndexError> {
        for (ticker, record) in &plan.new_deploys {
            let key = ticker.as_bytes().to_vec();
            if batch
                .get_through(store, "deploys", &key)
                .map_err(store_abort)?
                .is_some()
            {
                return Err(store_abort(StoreError::new(format!(
                    "deploy primary-key conflict for {}",
                    ticker
                ))));
            }
            let encoded =
                bincode::serialize(record).map_err(|e| store_abort(StoreError::from(e)))?;
            batch.put("deploys", key.clone(), encoded);

            // Initialize the supply row unless a delta in this very plan
            // writes it below.
            if !plan.supply_deltas.contains_key(ticker)
                && batch
                    .get_through(store, "supplies", &key)
                    .map_err(store_abort)?
                    .is_none()
            {
                let zero = bincode::serialize(&SupplyState::default())
                    .map_err(|e| store_abort(StoreError::from(e)))?;
                batch.put("supplies", key, zero);
            }
        }
        Ok(())
    }

    fn apply_supplies(
        &self,
        store: &dyn Store,
        batch: &mut StoreBatch,
        plan: &CommitPlan,
    ) -> Result<(), IndexError> {
        for (ticker, delta) in &plan.supply_deltas {
            let key = ticker.as_bytes().to_vec();
            let current: SupplyState = match batch
                .get_through(store, "supplies", &key)
                .map_err(store_abort)?
            {
                Some(bytes) => bincode::deserialize(&bytes)
                    .map_err(|e| store_abort(StoreError::from(e)))?,
                None => SupplyState::default(),
            };

            let next = SupplyState {
                universal_minted: shift(current.universal_minted, delta.universal)
                    .map_err(store_abort)?,
                legacy_minted: shift(current.legacy_minted, delta.legacy)
                    .map_err(store_abort)?,
                burned: shift(current.burned, delta.burned).map_err(store_abort)?,
            };

            // Supply cap invariant, when the ticker is deployed in the
            // universal namespace (legacy-only tickers track burns without
            // a local deploy record).
            let deploy = match plan.new_deploys.get(ticker) {
                Some(record) => Some(record.clone()),
                None => {
                    use crate::store::StateReader;
                    store.deploy(ticker).map_err(store_abort)?
                }
            };
            if let Some(deploy) = deploy {
                if next.committed() > deploy.max_supply {
                    return Err(store_abort(StoreError::new(format!(
                        "supply for {} would exceed max_supply",
                        ticker
                    ))));
                }
            }

            let encoded =
                bincode::serialize(&next).map_err(|e| store_abort(StoreError::from(e)))?;
            batch.put("supplies", key, encoded);
        }
        Ok(())
    }

    fn assign_and_append_log(
        &self,
        store: &dyn Store,
        batch: &mut StoreBatch,
        plan: &mut CommitPlan,
    ) -> Result<(), IndexError> {
        if plan.log_entries.is_empty() {
            return Ok(());
        }
        let mut next_id = read_next_log_id(store).map_err(store_abort)?;
        for entry in &mut plan.log_entries {
            entry.id = next_id;
            next_id += 1;
            batch.append_log(entry).map_err(store_abort)?;
        }
        batch.put(
            "chain_state",
            KEY_OP_LOG_NEXT_ID.to_vec(),
            next_id.to_le_bytes().to_vec(),
        );
        Ok(())
    }
}

/// Deterministic hash over the full plan, ids included. Recomputed before a
/// rollback; a mismatch means the stored plan cannot be trusted as an
/// inverse.
pub fn plan_checksum(plan: &CommitPlan) -> Vec<u8> {
    let encoded = bincode::serialize(plan).unwrap_or_default();
    Sha256::digest(&encoded).to_vec()
}

fn store_abort(e: StoreError) -> IndexError {
    IndexError::transient(ErrorCode::StoreConflict, e.to_string())
}

fn shift(current: u128, delta: i128) -> Result<u128, StoreError> {
    let next = (current as i128)
        .checked_add(delta)
        .ok_or_else(|| StoreError::new("supply overflow at commit"))?;
    if next < 0 {
        return Err(StoreError::new("supply would go negative at commit"));
    }
    Ok(next as u128)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_indexed_tip, read_processed_block, StateReader};
    use crate::testkit::{deploy_record, put_balance, put_deploy, test_store};
    use crate::types::{OpLogEntry, SupplyDelta};

    fn entry(height: i32, tx_index: u32, sub_index: u32) -> OpLogEntry {
        OpLogEntry {
            id: 0,
            txid: "cd".repeat(32),
            op: "mint".into(),
            ticker: Some("ALFA".into()),
            amount: Some(5),
            block_height: height,
            block_hash: "ab".repeat(32),
            tx_index,
            sub_index,
            from_address: None,
            to_address: Some("addrA".into()),
            valid: true,
            error_code: None,
            timestamp: 1_700_000_000,
        }
    }

    fn plan_for(height: i32) -> CommitPlan {
        CommitPlan {
            height,
            hash: format!("{:064x}", height as u128 + 0xabc),
            prev_hash: format!("{:064x}", height as u128 + 0xabb),
            block_time: 1_700_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_commit_applies_everything_atomically() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, Some(10), 0));

        let engine = CommitEngine::new(store.clone());
        let mut plan = plan_for(101);
        plan.balance_deltas
            .insert(("addrA".into(), "ALFA".into()), 5);
        plan.supply_deltas.insert(
            "ALFA".into(),
            SupplyDelta {
                universal: 5,
                legacy: 0,
                burned: 0,
            },
        );
        plan.log_entries.push(entry(101, 0, 0));

        let processed = engine.commit_block(plan).unwrap();
        assert_eq!(processed.plan.log_entries[0].id, 1);

        assert_eq!(store.balance("addrA", "ALFA").unwrap(), 5);
        assert_eq!(store.supply("ALFA").unwrap().universal_minted, 5);
        let tip = read_indexed_tip(store.as_ref()).unwrap().unwrap();
        assert_eq!(tip.height, 101);
        assert!(read_processed_block(store.as_ref(), 101).unwrap().is_some());
    }

    #[test]
    fn test_commit_rejects_negative_balance() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, None, 0));
        put_balance(store.as_ref(), "addrA", "ALFA", 3);

        let engine = CommitEngine::new(store.clone());
        let mut plan = plan_for(101);
        plan.balance_deltas
            .insert(("addrA".into(), "ALFA".into()), -4);

        let err = engine.commit_block(plan).unwrap_err();
        assert!(err.is_transient());
        // Nothing written.
        assert_eq!(store.balance("addrA", "ALFA").unwrap(), 3);
        assert!(read_indexed_tip(store.as_ref()).unwrap().is_none());
    }

    #[test]
    fn test_commit_rejects_duplicate_deploy() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, None, 0));

        let engine = CommitEngine::new(store.clone());
        let mut plan = plan_for(101);
        plan.new_deploys
            .insert("ALFA".into(), deploy_record("ALFA", 500, None, 0));

        assert!(engine.commit_block(plan).is_err());
        assert_eq!(store.deploy("ALFA").unwrap().unwrap().max_supply, 1000);
    }

    #[test]
    fn test_commit_rejects_supply_over_cap() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 10, None, 0));

        let engine = CommitEngine::new(store.clone());
        let mut plan = plan_for(101);
        plan.supply_deltas.insert(
            "ALFA".into(),
            SupplyDelta {
                universal: 11,
                legacy: 0,
                burned: 0,
            },
        );

        assert!(engine.commit_block(plan).is_err());
        assert_eq!(store.supply("ALFA").unwrap().universal_minted, 0);
    }

    #[test]
    fn test_log_ids_monotonic_across_blocks() {
        let (store, _temp) = test_store();
        let engine = CommitEngine::new(store.clone());

        let mut plan = plan_for(101);
        plan.log_entries.push(entry(101, 0, 0));
        plan.log_entries.push(entry(101, 1, 0));
        let processed = engine.commit_block(plan).unwrap();
        assert_eq!(processed.plan.log_entries[0].id, 1);
        assert_eq!(processed.plan.log_entries[1].id, 2);

        let mut plan = plan_for(102);
        plan.log_entries.push(entry(102, 0, 0));
        let processed = engine.commit_block(plan).unwrap();
        assert_eq!(processed.plan.log_entries[0].id, 3);
    }

    #[test]
    fn test_new_deploy_initializes_supply_row() {
        let (store, _temp) = test_store();
        let engine = CommitEngine::new(store.clone());

        let mut plan = plan_for(100);
        plan.new_deploys
            .insert("ALFA".into(), deploy_record("ALFA", 1000, None, 0));
        engine.commit_block(plan).unwrap();

        assert!(store.get("supplies", b"ALFA").unwrap().is_some());
        assert_eq!(store.supply("ALFA").unwrap(), SupplyState::default());
    }

    #[test]
    fn test_checksum_stable_and_sensitive() {
        let mut plan = plan_for(100);
        plan.balance_deltas
            .insert(("addrA".into(), "ALFA".into()), 5);
        let a = plan_checksum(&plan);
        let b = plan_checksum(&plan.clone());
        assert_eq!(a, b);

        plan.balance_deltas
            .insert(("addrA".into(), "ALFA".into()), 6);
        assert_ne!(a, plan_checksum(&plan));
    }
}
