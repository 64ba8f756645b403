/// No-return processor: an inscription-based transfer terminated without a
/// receiver is credited to the burn bucket of the universal supply.
///
/// The oracle's transfer events for the transaction are matched exactly by
/// (ticker, amount, sender). An event consumed by an earlier no-return in
/// the same block cannot match again.

use crate::address::resolve_sender;
use crate::constants::OP_TAG_NO_RETURN;
use crate::intermediate::Context;
use crate::legacy::match_transfer_event;
use crate::protocol::{normalize_ticker, parse_amount};
use crate::types::{ErrorCode, LogFields, ProcessResult, StateUpdate, SupplyBucket};

use super::{require_string_field, OpProcessor, Operation};

pub struct NoReturnProcessor;

impl OpProcessor for NoReturnProcessor {
    fn op_tag(&self) -> &'static str {
        OP_TAG_NO_RETURN
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

        // The ticker must exist in the legacy namespace; its decimals govern
        // how the amount string scales to base units.
        let record = match ctx.legacy().lookup_ticker(&ticker) {
            Ok(Some(record)) => record,
            Ok(None) => return ProcessResult::invalid(ErrorCode::TickerNotDeployed, log),
            Err(e) => {
                if ctx.legacy().require_legacy() {
                    return ProcessResult::transient(ErrorCode::OracleUnavailable, e.message);
                }
                return ProcessResult::invalid(
                    ErrorCode::LegacyLookupRequiredButUnavailable,
                    log,
                );
            }
        };

        let amt_str = match require_string_field(op.payload, "amt") {
            Ok(s) => s,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        let amount = match parse_amount(amt_str, record.decimals) {
            Ok(v) if v > 0 => v,
            Ok(_) => return ProcessResult::invalid(ErrorCode::InvalidAmount, log),
            Err(code) => return ProcessResult::invalid(code, log),
        };
        log.amount = Some(amount);

        let sender = match resolve_sender(op.tx) {
            Some(addr) => addr.to_string(),
            None => return ProcessResult::invalid(ErrorCode::UnresolvableSender, log),
        };
        log.from_address = Some(sender.clone());

        let events = match ctx.legacy().transfer_events_for_tx(&op.tx.txid) {
            Ok(events) => events,
            Err(e) => {
                if ctx.legacy().require_legacy() {
                    return ProcessResult::transient(ErrorCode::OracleUnavailable, e.message);
                }
                return ProcessResult::invalid(
                    ErrorCode::LegacyLookupRequiredButUnavailable,
                    log,
                );
            }
        };

        let unconsumed: Vec<_> = events
            .iter()
            .filter(|e| !ctx.is_event_consumed(&e.inscription_id))
            .cloned()
            .collect();
        let matched = match match_transfer_event(
            &unconsumed,
            &ticker,
            amount,
            &sender,
            &Default::default(),
        ) {
            Some(event) => event.clone(),
            None => return ProcessResult::invalid(ErrorCode::LegacyEventNotFound, log),
        };

        ProcessResult::success(
            vec![
                StateUpdate::SupplyAdd {
                    ticker,
                    bucket: SupplyBucket::Burned,
                    delta: amount,
                },
                StateUpdate::LegacyEventConsumed {
                    inscription_id: matched.inscription_id,
                },
            ],
            log,
        )
    }
}
