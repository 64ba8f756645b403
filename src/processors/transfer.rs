/// Transfer processor: moves units from the first resolvable input owner to
/// the first standard output(s).
///
/// `amt` is a single decimal string, or an array of them for multi-receiver
/// transfers. A multi-receiver transfer is one operation: the sender needs
/// the full total available and either every receiver is credited or none
/// is.

use crate::address::{resolve_sender, standard_output_receivers};
use crate::constants::OP_TAG_TRANSFER;
use crate::intermediate::Context;
use crate::protocol::{normalize_ticker, parse_amount, validate_transfer};
use crate::types::{ErrorCode, LogFields, ProcessResult, StateUpdate};

use super::{store_failure, OpProcessor, Operation};

pub struct TransferProcessor;

impl OpProcessor for TransferProcessor {
    fn op_tag(&self) -> &'static str {
        OP_TAG_TRANSFER
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

        let deploy = match ctx.deploy_of(&ticker) {
            Ok(Some(d)) => d,
            Ok(None) => return ProcessResult::invalid(ErrorCode::TickerNotDeployed, log),
            Err(e) => return store_failure(e),
        };

        let amounts = match parse_amounts(op, deploy.decimals) {
            Ok(v) => v,
            Err(code) => return ProcessResult::invalid(code, log),
        };
        let mut total: u128 = 0;
        for amount in &amounts {
            if *amount == 0 {
                return ProcessResult::invalid(ErrorCode::InvalidAmount, log);
            }
            total = match total.checked_add(*amount) {
                Some(t) => t,
                None => return ProcessResult::invalid(ErrorCode::InvalidAmount, log),
            };
        }
        log.amount = Some(total);

        let sender = match resolve_sender(op.tx) {
            Some(addr) => addr.to_string(),
            None => return ProcessResult::invalid(ErrorCode::UnresolvableSender, log),
        };
        log.from_address = Some(sender.clone());

        let available = match ctx.balance_of(&sender, &ticker) {
            Ok(v) => v,
            Err(e) => return store_failure(e),
        };
        if let Err(code) = validate_transfer(available, total) {
            return ProcessResult::invalid(code, log);
        }

        let receivers = match standard_output_receivers(op.tx, amounts.len()) {
            Some(r) => r,
            None => return ProcessResult::invalid(ErrorCode::UnresolvableReceiver, log),
        };
        log.to_address = Some(receivers[0].clone());

        let mut updates = vec![StateUpdate::BalanceSub {
            address: sender,
            ticker: ticker.clone(),
            delta: total,
        }];
        for (receiver, amount) in receivers.into_iter().zip(amounts) {
            updates.push(StateUpdate::BalanceAdd {
                address: receiver,
                ticker: ticker.clone(),
                delta: amount,
            });
        }

        ProcessResult::success(updates, log)
    }
}

/// One amount per receiver. A plain string is the single-receiver form.
fn parse_amounts(op: &Operation, decimals: u8) -> Result<Vec<u128>, ErrorCode> {
    match op.payload.extra.get("amt") {
        Some(serde_json::Value::String(s)) => Ok(vec![parse_amount(s, decimals)?]),
        Some(serde_json::Value::Array(items)) => {
            if items.is_empty() {
                return Err(ErrorCode::InvalidAmount);
            }
            let mut amounts = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or(ErrorCode::InvalidAmount)?;
                amounts.push(parse_amount(s, decimals)?);
            }
            Ok(amounts)
        }
        Some(_) => Err(ErrorCode::InvalidAmount),
        None => Err(ErrorCode::MissingField),
    }
}
