/// Block Processor
///
/// Drives one block through decode -> route -> process, folding successful
/// updates into the per-block intermediate so later operations observe
/// earlier effects. Operations run strictly in (tx_index, sub_index) order;
/// there is no reordering or parallelism inside a block.
///
/// The output is a commit plan. Nothing is written here; a transient
/// outcome anywhere discards the intermediate and surfaces as a block-level
/// retry.

use std::sync::Arc;

use crate::config::IndexerConfig;
use crate::intermediate::{BlockIntermediate, Context};
use crate::legacy::LegacyBridge;
use crate::metrics;
use crate::payload::{decode_transaction, DecodedOp};
use crate::registry::OpiRegistry;
use crate::store::Store;
use crate::types::{
    Block, CommitPlan, ErrorCode, IndexError, LogFields, OpLogEntry, Outcome, Transaction,
};

pub struct BlockProcessor {
    store: Arc<dyn Store>,
    registry: Arc<OpiRegistry>,
    bridge: Arc<LegacyBridge>,
    protocol_tag: String,
    payload_max_bytes: usize,
}

impl BlockProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<OpiRegistry>,
        bridge: Arc<LegacyBridge>,
        config: &IndexerConfig,
    ) -> Self {
        BlockProcessor {
            store,
            registry,
            bridge,
            protocol_tag: config.protocol_tag.clone(),
            payload_max_bytes: config.payload_max_bytes,
        }
    }

    /// Process a block into a commit plan. The caller has already verified
    /// that `block.prev_hash` extends the indexed tip.
    pub fn process_block(&self, block: &Block) -> Result<CommitPlan, IndexError> {
        let mut intermediate = BlockIntermediate::new();
        let mut log_entries: Vec<OpLogEntry> = Vec::new();

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let tx_index = tx_index as u32;
            let decoded = decode_transaction(tx, &self.protocol_tag, self.payload_max_bytes);

            for op in decoded {
                if let Some(code) = op.structural_error {
                    log_entries.push(self.invalid_entry(block, tx, tx_index, &op, code));
                    metrics::OPERATIONS_INVALID
                        .with_label_values(&[code.as_str()])
                        .inc();
                    continue;
                }

                let payload = op
                    .payload
                    .as_ref()
                    .expect("decoded op without error carries a payload");

                let processor = match self.registry.route(&payload.op) {
                    Some(p) => p,
                    None => {
                        log_entries.push(self.invalid_entry(
                            block,
                            tx,
                            tx_index,
                            &op,
                            ErrorCode::UnknownOp,
                        ));
                        metrics::OPERATIONS_INVALID
                            .with_label_values(&[ErrorCode::UnknownOp.as_str()])
                            .inc();
                        continue;
                    }
                };

                let operation = crate::processors::Operation {
                    payload,
                    tx,
                    block_height: block.height,
                    block_hash: &block.hash,
                    block_time: block.time,
                    tx_index,
                    sub_index: op.sub_index,
                };

                let ctx = Context::new(self.store.as_ref(), &intermediate, self.bridge.as_ref());
                let result = processor.process(&operation, &ctx);
                drop(ctx);

                match result.outcome {
                    Outcome::Success => {
                        intermediate.apply(&result.updates).map_err(|code| {
                            // A validated operation must be applicable; this
                            // is a processor bug, not chain data.
                            IndexError::transient(
                                ErrorCode::StoreConflict,
                                format!(
                                    "intermediate apply failed with {} at tx {} sub {}",
                                    code, tx_index, op.sub_index
                                ),
                            )
                        })?;
                        log_entries.push(entry_from_log(
                            block,
                            tx,
                            tx_index,
                            op.sub_index,
                            &payload.op,
                            result.log,
                            true,
                            None,
                        ));
                        metrics::OPERATIONS_VALID
                            .with_label_values(&[payload.op.as_str()])
                            .inc();
                    }
                    Outcome::Invalid(code) => {
                        log_entries.push(entry_from_log(
                            block,
                            tx,
                            tx_index,
                            op.sub_index,
                            &payload.op,
                            result.log,
                            false,
                            Some(code),
                        ));
                        metrics::OPERATIONS_INVALID
                            .with_label_values(&[code.as_str()])
                            .inc();
                    }
                    Outcome::Transient { code, message } => {
                        tracing::warn!(
                            height = block.height,
                            tx = %tx.txid,
                            code = %code,
                            message = %message,
                            "transient failure, aborting block"
                        );
                        return Err(IndexError::transient(code, message));
                    }
                }
            }
        }

        Ok(intermediate.seal(
            block.height,
            block.hash.clone(),
            block.prev_hash.clone(),
            block.time,
            log_entries,
        ))
    }

    fn invalid_entry(
        &self,
        block: &Block,
        tx: &Transaction,
        tx_index: u32,
        op: &DecodedOp,
        code: ErrorCode,
    ) -> OpLogEntry {
        let log = LogFields {
            ticker: op.tick.as_ref().map(|t| t.to_uppercase()),
            ..Default::default()
        };
        entry_from_log(
            block,
            tx,
            tx_index,
            op.sub_index,
            op.op.as_deref().unwrap_or("unknown"),
            log,
            false,
            Some(code),
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn entry_from_log(
    block: &Block,
    tx: &Transaction,
    tx_index: u32,
    sub_index: u32,
    op_tag: &str,
    log: LogFields,
    valid: bool,
    error_code: Option<ErrorCode>,
) -> OpLogEntry {
    OpLogEntry {
        // Assigned by the commit engine.
        id: 0,
        txid: tx.txid.clone(),
        op: op_tag.to_string(),
        ticker: log.ticker,
        amount: log.amount,
        block_height: block.height,
        block_hash: block.hash.clone(),
        tx_index,
        sub_index,
        from_address: log.from_address,
        to_address: log.to_address,
        valid,
        error_code: error_code.map(|c| c.as_str().to_string()),
        // Block time, not wall clock: replay must reproduce the log exactly.
        timestamp: block.time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::test_utils::MockLegacyOracle;
    use crate::registry::build_registry;
    use crate::testkit::{
        deploy_record, make_block, op_return_tx, op_return_tx_with_outputs, plain_tx, put_deploy,
        test_store,
    };

    fn processor_with(
        oracle: MockLegacyOracle,
        require_legacy: bool,
    ) -> (BlockProcessor, Arc<crate::store::RocksDbStore>, tempfile::TempDir) {
        let (store, temp) = test_store();
        let config = IndexerConfig {
            require_legacy,
            ..Default::default()
        };
        let registry = Arc::new(build_registry(&config).unwrap());
        let bridge = Arc::new(LegacyBridge::new(
            Arc::new(oracle),
            store.clone(),
            require_legacy,
        ));
        let processor = BlockProcessor::new(store.clone(), registry, bridge, &config);
        (processor, store, temp)
    }

    #[test]
    fn test_block_with_no_protocol_traffic() {
        let (processor, _store, _temp) = processor_with(MockLegacyOracle::new(), false);
        let block = make_block(100, "prev", "a", vec![plain_tx("addrA", "addrB")]);
        let plan = processor.process_block(&block).unwrap();
        assert!(plan.log_entries.is_empty());
        assert!(plan.balance_deltas.is_empty());
        assert_eq!(plan.height, 100);
    }

    #[test]
    fn test_intra_block_dependency_mint_then_transfer() {
        let (processor, store, _temp) = processor_with(MockLegacyOracle::new(), false);
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, Some(10), 0));

        // One OP_RETURN, two operations: mint 5 to addrA, then transfer 3
        // of it to addrB. The transfer only validates because it sees the
        // mint through the intermediate.
        let payload = r#"[{"p":"brc-20","op":"mint","tick":"ALFA","amt":"5"},{"p":"brc-20","op":"transfer","tick":"ALFA","amt":"3"}]"#;
        let tx = op_return_tx(payload, &[Some("addrA")], &["addrA", "addrB"]);
        let block = make_block(200, "prev", "a", vec![tx]);

        let plan = processor.process_block(&block).unwrap();
        assert_eq!(plan.log_entries.len(), 2);
        assert!(plan.log_entries.iter().all(|e| e.valid));
        assert_eq!(plan.log_entries[0].sub_index, 0);
        assert_eq!(plan.log_entries[1].sub_index, 1);

        assert_eq!(
            plan.balance_deltas[&("addrA".to_string(), "ALFA".to_string())],
            2
        );
        assert_eq!(
            plan.balance_deltas[&("addrB".to_string(), "ALFA".to_string())],
            3
        );
        assert_eq!(plan.supply_deltas["ALFA"].universal, 5);
    }

    #[test]
    fn test_unknown_op_logged_invalid() {
        let (processor, _store, _temp) = processor_with(MockLegacyOracle::new(), false);
        let payload = r#"{"p":"brc-20","op":"burnit","tick":"ALFA","amt":"1"}"#;
        let tx = op_return_tx_with_outputs(payload, &["addrA"]);
        let block = make_block(100, "prev", "a", vec![tx]);

        let plan = processor.process_block(&block).unwrap();
        assert_eq!(plan.log_entries.len(), 1);
        let entry = &plan.log_entries[0];
        assert!(!entry.valid);
        assert_eq!(entry.error_code.as_deref(), Some("UNKNOWN_OP"));
        assert_eq!(entry.op, "burnit");
        assert!(plan.balance_deltas.is_empty());
    }

    #[test]
    fn test_structural_error_logged_at_position() {
        let (processor, _store, _temp) = processor_with(MockLegacyOracle::new(), false);
        let tx = op_return_tx_with_outputs(r#"{"p":"brc-20","op":"mint"}"#, &["addrA"]);
        let block = make_block(100, "prev", "a", vec![plain_tx("addrX", "addrY"), tx]);

        let plan = processor.process_block(&block).unwrap();
        assert_eq!(plan.log_entries.len(), 1);
        let entry = &plan.log_entries[0];
        assert_eq!(entry.tx_index, 1);
        assert_eq!(entry.sub_index, 0);
        assert_eq!(entry.error_code.as_deref(), Some("MISSING_FIELD"));
    }

    #[test]
    fn test_invalid_op_does_not_stop_block() {
        let (processor, store, _temp) = processor_with(MockLegacyOracle::new(), false);
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, Some(10), 0));

        let over_mint = op_return_tx_with_outputs(
            r#"{"p":"brc-20","op":"mint","tick":"ALFA","amt":"11"}"#,
            &["addrA"],
        );
        let good_mint = op_return_tx_with_outputs(
            r#"{"p":"brc-20","op":"mint","tick":"ALFA","amt":"10"}"#,
            &["addrA"],
        );
        let block = make_block(101, "prev", "a", vec![over_mint, good_mint]);

        let plan = processor.process_block(&block).unwrap();
        assert_eq!(plan.log_entries.len(), 2);
        assert!(!plan.log_entries[0].valid);
        assert_eq!(
            plan.log_entries[0].error_code.as_deref(),
            Some("MINT_EXCEEDS_LIMIT")
        );
        assert!(plan.log_entries[1].valid);
        assert_eq!(plan.supply_deltas["ALFA"].universal, 10);
    }

    #[test]
    fn test_transient_outcome_aborts_block() {
        let oracle = MockLegacyOracle::new();
        oracle.set_available(false);
        let (processor, _store, _temp) = processor_with(oracle, true);

        let deploy = op_return_tx_with_outputs(
            r#"{"p":"brc-20","op":"deploy","tick":"ALFA","max":"1000"}"#,
            &["addrA"],
        );
        let block = make_block(100, "prev", "a", vec![deploy]);

        let err = processor.process_block(&block).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.code(), ErrorCode::OracleUnavailable);
    }

    #[test]
    fn test_log_order_is_canonical() {
        let (processor, store, _temp) = processor_with(MockLegacyOracle::new(), false);
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, None, 0));

        let tx0 = op_return_tx(
            r#"[{"p":"brc-20","op":"mint","tick":"ALFA","amt":"1"},{"p":"brc-20","op":"mint","tick":"ALFA","amt":"2"}]"#,
            &[Some("addrA")],
            &["addrA"],
        );
        let tx1 = op_return_tx(
            r#"{"p":"brc-20","op":"mint","tick":"ALFA","amt":"3"}"#,
            &[Some("addrB")],
            &["addrB"],
        );
        let block = make_block(100, "prev", "a", vec![tx0, tx1]);

        let plan = processor.process_block(&block).unwrap();
        let positions: Vec<(u32, u32)> = plan
            .log_entries
            .iter()
            .map(|e| (e.tx_index, e.sub_index))
            .collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0)]);
    }
}
