/// Chain Reorganization Handling
///
/// When the node's chain diverges from the indexed chain, the indexed
/// suffix above the common ancestor is unwound by applying the inverse of
/// each block's stored commit plan, newest first: balance deltas negated,
/// deploys created there deleted, supply deltas negated, log entries
/// removed, and the processed-block row dropped. Each block's inverse is
/// one atomic batch, so a crash mid-reorg leaves a consistent chain at some
/// intermediate height.
///
/// Inverses are derivable only from the stored plans. A missing plan, a
/// checksum mismatch, or an ancestor deeper than the configured limit is
/// fatal: operator intervention (restore from a snapshot below the
/// ancestor) is required.

use std::sync::Arc;

use crate::constants::{KEY_INDEXED_TIP, KEY_OP_LOG_NEXT_ID};
use crate::keys;
use crate::metrics;
use crate::node_client::NodeClient;
use crate::store::{decode_balance, encode_balance, read_processed_block, Store, StoreError};
use crate::types::{ChainTip, ErrorCode, IndexError, ProcessedBlock, SupplyState};

/// Details of one handled reorganization.
#[derive(Debug, Clone)]
pub struct ReorgInfo {
    /// Height of the last common block (the new indexed tip).
    pub fork_height: i32,
    /// Number of blocks unwound.
    pub orphaned_blocks: i32,
    /// Hash of the abandoned indexed tip.
    pub old_tip_hash: String,
}

pub struct ReorgHandler {
    store: Arc<dyn Store>,
    node: Arc<dyn NodeClient>,
    reorg_depth_limit: i32,
    start_height: i32,
}

impl ReorgHandler {
    pub fn new(
        store: Arc<dyn Store>,
        node: Arc<dyn NodeClient>,
        reorg_depth_limit: i32,
        start_height: i32,
    ) -> Self {
        ReorgHandler {
            store,
            node,
            reorg_depth_limit,
            start_height,
        }
    }

    /// Main entry point, called when the next block's prev_hash does not
    /// extend the indexed tip (or the node reports a different hash at the
    /// tip height). Finds the common ancestor and unwinds down to it.
    pub fn handle_reorg(&self, tip: &ChainTip) -> Result<ReorgInfo, IndexError> {
        println!("\n⚠️  REORG DETECTED ⚠️");
        println!("  Indexed tip: {} ({})", tip.height, &tip.hash[..16.min(tip.hash.len())]);

        let fork_height = self.find_fork_point(tip)?;
        let orphaned = tip.height - fork_height;
        println!("  Fork point: {} (common ancestor)", fork_height);
        println!("  Orphaning {} block(s)", orphaned);

        self.rollback_to(fork_height, tip.height)?;

        metrics::REORGS_HANDLED.inc();
        metrics::BLOCKS_ROLLED_BACK.inc_by(orphaned as u64);
        tracing::info!(
            fork_height = fork_height,
            orphaned = orphaned,
            "reorg rollback complete"
        );

        Ok(ReorgInfo {
            fork_height,
            orphaned_blocks: orphaned,
            old_tip_hash: tip.hash.clone(),
        })
    }

    /// Walk backwards from the indexed tip comparing our hash against the
    /// node's at each height until they agree.
    pub fn find_fork_point(&self, tip: &ChainTip) -> Result<i32, IndexError> {
        let mut height = tip.height;

        while height >= self.start_height {
            if tip.height - height > self.reorg_depth_limit {
                return Err(IndexError::fatal(
                    ErrorCode::ReorgIrrecoverable,
                    format!(
                        "no common ancestor within {} blocks of the tip",
                        self.reorg_depth_limit
                    ),
                ));
            }

            let ours = match read_processed_block(self.store.as_ref(), height) {
                Ok(Some(block)) => block.hash,
                Ok(None) => {
                    return Err(IndexError::fatal(
                        ErrorCode::ReorgIrrecoverable,
                        format!("indexed chain has no processed block at height {}", height),
                    ));
                }
                Err(e) => return Err(store_abort(e)),
            };

            let theirs = self
                .node
                .block_hash_at(height)
                .map_err(|e| IndexError::transient(ErrorCode::NodeUnavailable, e.message))?;

            if theirs.as_deref() == Some(ours.as_str()) {
                return Ok(height);
            }
            height -= 1;
        }

        // Diverged all the way down to the start of indexing: the virtual
        // pre-start tip is the ancestor, if the limit allows reaching it.
        if tip.height - (self.start_height - 1) > self.reorg_depth_limit {
            return Err(IndexError::fatal(
                ErrorCode::ReorgIrrecoverable,
                format!(
                    "no common ancestor within {} blocks of the tip",
                    self.reorg_depth_limit
                ),
            ));
        }
        Ok(self.start_height - 1)
    }

    /// Unwind every indexed block strictly above `fork_height`, newest
    /// first, one atomic batch per block.
    pub fn rollback_to(&self, fork_height: i32, tip_height: i32) -> Result<i32, IndexError> {
        let mut rolled_back = 0;

        for height in ((fork_height + 1)..=tip_height).rev() {
            println!("  📦 Disconnecting block at height {}", height);
            let stored = match read_processed_block(self.store.as_ref(), height) {
                Ok(Some(block)) => block,
                Ok(None) => {
                    return Err(IndexError::fatal(
                        ErrorCode::ReorgIrrecoverable,
                        format!("commit plan missing for height {}", height),
                    ));
                }
                Err(e) => return Err(store_abort(e)),
            };

            if crate::commit::plan_checksum(&stored.plan) != stored.commit_checksum {
                return Err(IndexError::fatal(
                    ErrorCode::CommitChecksumMismatch,
                    format!("stored commit plan for height {} fails its checksum", height),
                ));
            }

            self.disconnect_block(&stored)?;
            rolled_back += 1;
        }

        Ok(rolled_back)
    }

    /// Apply the inverse of one stored plan.
    fn disconnect_block(&self, stored: &ProcessedBlock) -> Result<(), IndexError> {
        let store = self.store.as_ref();
        let mut batch = store.begin_tx();
        let plan = &stored.plan;

        // 1. Negate balance deltas. A zero result is written back rather
        // than deleted: a zero row and an absent row read identically.
        for ((address, ticker), delta) in &plan.balance_deltas {
            let key = keys::balance_key(ticker, address);
            let current = match batch
                .get_through(store, "balances", &key)
                .map_err(store_abort)?
            {
                Some(bytes) => decode_balance(&bytes).map_err(store_abort)? as i128,
                None => 0,
            };
            let restored = current - delta;
            if restored < 0 {
                return Err(IndexError::fatal(
                    ErrorCode::ReorgIrrecoverable,
                    format!(
                        "inverse would drive balance ({}, {}) negative at height {}",
                        address, ticker, stored.height
                    ),
                ));
            }
            batch.put("balances", key, encode_balance(restored as u128));
        }

        // 2. Delete deploys created in this block.
        for ticker in plan.new_deploys.keys() {
            batch.delete("deploys", ticker.as_bytes().to_vec());
        }

        // 3. Negate supply deltas; a ticker deployed in this block loses
        // its supply row entirely.
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
            let inverse = delta.negated();
            let restored = SupplyState {
                universal_minted: unshift(current.universal_minted, inverse.universal, stored.height)?,
                legacy_minted: unshift(current.legacy_minted, inverse.legacy, stored.height)?,
                burned: unshift(current.burned, inverse.burned, stored.height)?,
            };
            if plan.new_deploys.contains_key(ticker) {
                if restored != SupplyState::default() {
                    return Err(IndexError::fatal(
                        ErrorCode::ReorgIrrecoverable,
                        format!(
                            "supply for {} nonzero after unwinding its deploy block",
                            ticker
                        ),
                    ));
                }
                batch.delete("supplies", key);
            } else {
                let encoded = bincode::serialize(&restored)
                    .map_err(|e| store_abort(StoreError::from(e)))?;
                batch.put("supplies", key, encoded);
            }
        }
        for ticker in plan.new_deploys.keys() {
            if !plan.supply_deltas.contains_key(ticker) {
                batch.delete("supplies", ticker.as_bytes().to_vec());
            }
        }

        // 4. Remove this block's log entries and rewind the id counter.
        for entry in &plan.log_entries {
            batch.delete("op_log", keys::op_log_key(entry.id));
            batch.delete(
                "op_log_index",
                keys::op_log_index_key(entry.block_height, entry.tx_index, entry.sub_index),
            );
        }
        if let Some(first) = plan.log_entries.first() {
            batch.put(
                "chain_state",
                KEY_OP_LOG_NEXT_ID.to_vec(),
                first.id.to_le_bytes().to_vec(),
            );
        }

        // 5. Drop the processed-block row and step the tip back.
        batch.delete("processed_blocks", keys::processed_block_key(stored.height));
        if stored.height - 1 >= self.start_height {
            let tip = ChainTip {
                height: stored.height - 1,
                hash: stored.prev_hash.clone(),
            };
            let encoded =
                bincode::serialize(&tip).map_err(|e| store_abort(StoreError::from(e)))?;
            batch.put("chain_state", KEY_INDEXED_TIP.to_vec(), encoded);
        } else {
            batch.delete("chain_state", KEY_INDEXED_TIP.to_vec());
        }

        store.commit_tx(batch).map_err(store_abort)?;
        Ok(())
    }
}

fn unshift(current: u128, delta: i128, height: i32) -> Result<u128, IndexError> {
    let next = (current as i128).checked_add(delta).ok_or_else(|| {
        IndexError::fatal(
            ErrorCode::ReorgIrrecoverable,
            format!("supply inverse overflow at height {}", height),
        )
    })?;
    if next < 0 {
        return Err(IndexError::fatal(
            ErrorCode::ReorgIrrecoverable,
            format!("supply inverse negative at height {}", height),
        ));
    }
    Ok(next as u128)
}

fn store_abort(e: StoreError) -> IndexError {
    IndexError::transient(ErrorCode::StoreConflict, e.to_string())
}
