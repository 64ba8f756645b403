/// Deploy processor: claims a ticker in the universal namespace.
///
/// Validation order is fixed (syntax, fields, amounts, prior deploy,
/// deployer resolution, legacy cross-check) so the rejection code for a
/// given transaction is the same on every replica.

use crate::address::first_standard_output;
use crate::constants::{DECIMALS_DEFAULT, OP_TAG_DEPLOY};
use crate::intermediate::Context;
use crate::legacy::DeployCrossCheck;
use crate::protocol::{normalize_ticker, parse_amount, parse_decimals, validate_deploy};
use crate::types::{
    DeployRecord, ErrorCode, LogFields, ProcessResult, StateUpdate,
};

use super::{optional_string_field, require_string_field, store_failure, OpProcessor, Operation};

pub struct DeployProcessor;

impl OpProcessor for DeployProcessor {
    fn op_tag(&self) -> &'static str {
        OP_TAG_DEPLOY
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

        let max_str = match require_string_field(op.payload, "max") {
            Ok(s) => s,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        let decimals = match optional_string_field(op.payload, "dec") {
            Ok(Some(s)) => match parse_decimals(s) {
                Ok(d) => d,
                Err(code) => return ProcessResult::invalid(code, log),
            },
            Ok(None) => DECIMALS_DEFAULT,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        let max_supply = match parse_amount(max_str, decimals) {
            Ok(v) => v,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        log.amount = Some(max_supply);

        let limit_per_mint = match optional_string_field(op.payload, "lim") {
            Ok(Some(s)) => match parse_amount(s, decimals) {
                Ok(v) => Some(v),
                Err(code) => return ProcessResult::invalid(code, log),
            },
            Ok(None) => None,
            Err(code) => return ProcessResult::invalid(code, log),
        };

        let already_deployed = match ctx.deploy_of(&ticker) {
            Ok(existing) => existing.is_some(),
            Err(e) => return store_failure(e),
        };
        if let Err(code) = validate_deploy(max_supply, limit_per_mint, already_deployed) {
            return ProcessResult::invalid(code, log);
        }

        let deployer = match first_standard_output(op.tx) {
            Some(addr) => addr.to_string(),
            None => return ProcessResult::invalid(ErrorCode::UnresolvableReceiver, log),
        };
        log.to_address = Some(deployer.clone());

        let (legacy_validated, legacy_snapshot) = match ctx.legacy().check_deploy(&ticker) {
            DeployCrossCheck::Exists(_) => {
                return ProcessResult::invalid(ErrorCode::LegacyTokenExists, log);
            }
            DeployCrossCheck::Deferred(message) => {
                return ProcessResult::transient(ErrorCode::OracleUnavailable, message);
            }
            DeployCrossCheck::Clear {
                validated,
                snapshot,
            } => (validated, snapshot),
        };

        let record = DeployRecord {
            ticker: ticker.clone(),
            max_supply,
            limit_per_mint,
            decimals,
            deployer_address: deployer,
            deploy_txid: op.tx.txid.clone(),
            deploy_height: op.block_height,
            deploy_tx_index: op.tx_index,
            timestamp: op.block_time,
            legacy_validated,
            legacy_snapshot,
        };

        ProcessResult::success(vec![StateUpdate::DeployCreate { record }], log)
    }
}
