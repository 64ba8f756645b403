/// Mint processor: credits freshly minted units to the first standard
/// output of the transaction.

use crate::address::first_standard_output;
use crate::constants::OP_TAG_MINT;
use crate::intermediate::Context;
use crate::protocol::{normalize_ticker, parse_amount, validate_mint};
use crate::types::{ErrorCode, LogFields, ProcessResult, StateUpdate, SupplyBucket};

use super::{require_string_field, store_failure, OpProcessor, Operation};

pub struct MintProcessor;

impl OpProcessor for MintProcessor {
    fn op_tag(&self) -> &'static str {
        OP_TAG_MINT
    }

    fn process(&self, op: &Operation, ctx: &Context) -> ProcessResult {
        let raw_tick = op.payload.tick.as_deref().unwrap_or_default();
        let mut log = LogFields {
            ticker: Some(raw_tick.to_uppercase()),
            ..Default::default()
        };

        let ticker = match normalize_ticker(raw_tick) {
            Ok(t) => t,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        log.ticker = Some(ticker.clone());

        // The deploy view includes deploys earlier in this block.
        let deploy = match ctx.deploy_of(&ticker) {
            Ok(Some(d)) => d,
            Ok(None) => return ProcessResult::invalid(ErrorCode::TickerNotDeployed, log),
            Err(e) => return store_failure(e),
        };

        let amt_str = match require_string_field(op.payload, "amt") {
            Ok(s) => s,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        let amount = match parse_amount(amt_str, deploy.decimals) {
            Ok(v) => v,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        log.amount = Some(amount);

        let supply = match ctx.supply_of(&ticker) {
            Ok(s) => s,
            Err(e) => return store_failure(e),
        };
        if let Err(code) = validate_mint(&deploy, &supply, amount) {
            return ProcessResult::invalid(code, log);
        }

        let receiver = match first_standard_output(op.tx) {
            Some(addr) => addr.to_string(),
            None => return ProcessResult::invalid(ErrorCode::UnresolvableReceiver, log),
        };
        log.to_address = Some(receiver.clone());

        ProcessResult::success(
            vec![
                StateUpdate::BalanceAdd {
                    address: receiver,
                    ticker: ticker.clone(),
                    delta: amount,
                },
                StateUpdate::SupplyAdd {
                    ticker,
                    bucket: SupplyBucket::Universal,
                    delta: amount,
                },
            ],
            log,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate::BlockIntermediate;
    use crate::legacy::test_utils::MockLegacyOracle;
    use crate::legacy::LegacyBridge;
    use crate::payload::decode_transaction;
    use crate::store::test_utils::create_test_store;
    use crate::store::RocksDbStore;
    use crate::testkit::{deploy_record, op_return_tx_with_outputs, operation, put_deploy};
    use crate::types::Outcome;
    use std::sync::Arc;

    fn run_with_store(
        store: &Arc<RocksDbStore>,
        payload: &str,
        output_addr: &str,
    ) -> ProcessResult {
        let bridge =
            LegacyBridge::new(Arc::new(MockLegacyOracle::new()), store.clone(), false);
        let tx = op_return_tx_with_outputs(payload, &[output_addr]);
        let decoded = decode_transaction(&tx, "brc-20", 520);
        let pending = BlockIntermediate::new();
        let ctx = Context::new(store.as_ref(), &pending, &bridge);
        let op = operation(&tx, decoded[0].payload.as_ref().unwrap(), 101, 0, 0);
        MintProcessor.process(&op, &ctx)
    }

    #[test]
    fn test_mint_success() {
        let (store, _temp) = create_test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, Some(10), 0));

        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"10"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.updates.len(), 2);
        assert_eq!(result.log.to_address.as_deref(), Some("addrA"));
        assert_eq!(result.log.amount, Some(10));
    }

    #[test]
    fn test_mint_undeployed_ticker() {
        let (store, _temp) = create_test_store();
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"10"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Invalid(ErrorCode::TickerNotDeployed));
    }

    #[test]
    fn test_mint_over_limit() {
        let (store, _temp) = create_test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, Some(10), 0));
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"11"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Invalid(ErrorCode::MintExceedsLimit));
    }

    #[test]
    fn test_mint_supply_boundary() {
        let (store, _temp) = create_test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 10, None, 0));

        // Mint exactly the remaining supply: fine.
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"10"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Success);

        // One over: rejected.
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"11"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Invalid(ErrorCode::MintExceedsSupply));
    }

    #[test]
    fn test_mint_sees_intermediate_supply() {
        let (store, _temp) = create_test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 10, None, 0));

        let bridge =
            LegacyBridge::new(Arc::new(MockLegacyOracle::new()), store.clone(), false);
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"6"}"#;
        let tx = op_return_tx_with_outputs(payload, &["addrA"]);
        let decoded = decode_transaction(&tx, "brc-20", 520);

        let mut pending = BlockIntermediate::new();
        {
            let ctx = Context::new(store.as_ref(), &pending, &bridge);
            let op = operation(&tx, decoded[0].payload.as_ref().unwrap(), 101, 0, 0);
            let result = MintProcessor.process(&op, &ctx);
            assert_eq!(result.outcome, Outcome::Success);
            pending.apply(&result.updates).unwrap();
        }

        // Second identical mint in the same block: only 4 remain.
        let ctx = Context::new(store.as_ref(), &pending, &bridge);
        let op = operation(&tx, decoded[0].payload.as_ref().unwrap(), 101, 1, 0);
        let result = MintProcessor.process(&op, &ctx);
        assert_eq!(result.outcome, Outcome::Invalid(ErrorCode::MintExceedsSupply));
    }

    #[test]
    fn test_mint_zero_amount() {
        let (store, _temp) = create_test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, None, 0));
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"0"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Invalid(ErrorCode::InvalidAmount));
    }

    #[test]
    fn test_mint_fractional_amount_with_decimals() {
        let (store, _temp) = create_test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 100_000, None, 3));
        let payload = r#"{"p":"brc-20","op":"mint","tick":"alfa","amt":"1.5"}"#;
        let result = run_with_store(&store, payload, "addrA");
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.log.amount, Some(1500));
    }
}
