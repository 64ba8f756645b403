/// Per-block Intermediate State
///
/// Mutable accumulator scoped to one block: balance deltas, new deploys,
/// supply deltas, and the legacy transfer events already consumed by a
/// no-return earlier in the block. Processors never write to the store;
/// their proposed updates are folded in here by the block processor, and a
/// later operation in the same block observes earlier effects through the
/// Context overlay.
///
/// Reset at block start, discarded on block failure, sealed into a commit
/// plan on success.

use std::collections::{BTreeMap, HashSet};

use crate::legacy::LegacyBridge;
use crate::store::{StateReader, Store, StoreError};
use crate::types::{
    CommitPlan, DeployRecord, ErrorCode, OpLogEntry, StateUpdate, SupplyBucket, SupplyDelta,
    SupplyState,
};

#[derive(Default)]
pub struct BlockIntermediate {
    /// (address, ticker) -> signed delta in base units.
    balance_deltas: BTreeMap<(String, String), i128>,
    new_deploys: BTreeMap<String, DeployRecord>,
    supply_deltas: BTreeMap<String, SupplyDelta>,
    consumed_inscriptions: HashSet<String>,
}

impl BlockIntermediate {
    pub fn new() -> Self {
        BlockIntermediate::default()
    }

    /// Fold a processor's proposed updates in. Overflow can only mean a
    /// validation bug upstream, so it surfaces as an error rather than
    /// wrapping silently.
    pub fn apply(&mut self, updates: &[StateUpdate]) -> Result<(), ErrorCode> {
        for update in updates {
            match update {
                StateUpdate::BalanceAdd {
                    address,
                    ticker,
                    delta,
                } => {
                    self.bump_balance(address, ticker, *delta as i128)?;
                }
                StateUpdate::BalanceSub {
                    address,
                    ticker,
                    delta,
                } => {
                    self.bump_balance(address, ticker, -(*delta as i128))?;
                }
                StateUpdate::DeployCreate { record } => {
                    self.new_deploys.insert(record.ticker.clone(), record.clone());
                }
                StateUpdate::SupplyAdd {
                    ticker,
                    bucket,
                    delta,
                } => {
                    let entry = self.supply_deltas.entry(ticker.clone()).or_default();
                    let slot = match bucket {
                        SupplyBucket::Universal => &mut entry.universal,
                        SupplyBucket::Legacy => &mut entry.legacy,
                        SupplyBucket::Burned => &mut entry.burned,
                    };
                    *slot = slot
                        .checked_add(*delta as i128)
                        .ok_or(ErrorCode::InvalidAmount)?;
                }
                StateUpdate::LegacyEventConsumed { inscription_id } => {
                    self.consumed_inscriptions.insert(inscription_id.clone());
                }
            }
        }
        Ok(())
    }

    fn bump_balance(&mut self, address: &str, ticker: &str, delta: i128) -> Result<(), ErrorCode> {
        let entry = self
            .balance_deltas
            .entry((address.to_string(), ticker.to_string()))
            .or_insert(0);
        *entry = entry.checked_add(delta).ok_or(ErrorCode::InvalidAmount)?;
        Ok(())
    }

    pub fn balance_delta(&self, address: &str, ticker: &str) -> i128 {
        self.balance_deltas
            .get(&(address.to_string(), ticker.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn deploy(&self, ticker: &str) -> Option<&DeployRecord> {
        self.new_deploys.get(ticker)
    }

    pub fn supply_delta(&self, ticker: &str) -> SupplyDelta {
        self.supply_deltas.get(ticker).copied().unwrap_or_default()
    }

    pub fn is_event_consumed(&self, inscription_id: &str) -> bool {
        self.consumed_inscriptions.contains(inscription_id)
    }

    /// Seal into a commit plan. Zero deltas are dropped so the plan (and
    /// its checksum) only carries real changes.
    pub fn seal(
        self,
        height: i32,
        hash: String,
        prev_hash: String,
        block_time: u64,
        log_entries: Vec<OpLogEntry>,
    ) -> CommitPlan {
        CommitPlan {
            height,
            hash,
            prev_hash,
            block_time,
            balance_deltas: self
                .balance_deltas
                .into_iter()
                .filter(|(_, delta)| *delta != 0)
                .collect(),
            new_deploys: self.new_deploys,
            supply_deltas: self
                .supply_deltas
                .into_iter()
                .filter(|(_, delta)| !delta.is_zero())
                .collect(),
            log_entries,
        }
    }
}

/// Read-only view handed to processors: committed state overlaid with the
/// current block's intermediate, plus the legacy bridge. Keeping the
/// surface to a few lookups keeps the overlay airtight.
pub struct Context<'a> {
    committed: &'a dyn Store,
    pending: &'a BlockIntermediate,
    legacy: &'a LegacyBridge,
}

impl<'a> Context<'a> {
    pub fn new(
        committed: &'a dyn Store,
        pending: &'a BlockIntermediate,
        legacy: &'a LegacyBridge,
    ) -> Self {
        Context {
            committed,
            pending,
            legacy,
        }
    }

    pub fn balance_of(&self, address: &str, ticker: &str) -> Result<u128, StoreError> {
        let committed = self.committed.balance(address, ticker)? as i128;
        let effective = committed
            .checked_add(self.pending.balance_delta(address, ticker))
            .ok_or_else(|| StoreError::new("balance overlay overflow"))?;
        if effective < 0 {
            return Err(StoreError::new(format!(
                "negative effective balance for ({}, {})",
                address, ticker
            )));
        }
        Ok(effective as u128)
    }

    pub fn deploy_of(&self, ticker: &str) -> Result<Option<DeployRecord>, StoreError> {
        if let Some(pending) = self.pending.deploy(ticker) {
            return Ok(Some(pending.clone()));
        }
        self.committed.deploy(ticker)
    }

    pub fn supply_of(&self, ticker: &str) -> Result<SupplyState, StoreError> {
        let committed = self.committed.supply(ticker)?;
        let delta = self.pending.supply_delta(ticker);
        Ok(SupplyState {
            universal_minted: apply_delta(committed.universal_minted, delta.universal)?,
            legacy_minted: apply_delta(committed.legacy_minted, delta.legacy)?,
            burned: apply_delta(committed.burned, delta.burned)?,
        })
    }

    pub fn legacy(&self) -> &LegacyBridge {
        self.legacy
    }

    pub fn is_event_consumed(&self, inscription_id: &str) -> bool {
        self.pending.is_event_consumed(inscription_id)
    }
}

fn apply_delta(committed: u128, delta: i128) -> Result<u128, StoreError> {
    let effective = (committed as i128)
        .checked_add(delta)
        .ok_or_else(|| StoreError::new("supply overlay overflow"))?;
    if effective < 0 {
        return Err(StoreError::new("negative effective supply"));
    }
    Ok(effective as u128)
}
