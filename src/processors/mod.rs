/// OPI Processors
///
/// Every operation type, built-in or extension, implements the same
/// contract: validate against the Context and propose updates. Processors
/// never touch the store; the block processor folds Success updates into
/// the per-block intermediate and the commit engine re-checks everything
/// before writing.

mod deploy;
mod mint;
mod no_return;
mod transfer;

pub use deploy::DeployProcessor;
pub use mint::MintProcessor;
pub use no_return::NoReturnProcessor;
pub use transfer::TransferProcessor;

use crate::intermediate::Context;
use crate::store::StoreError;
use crate::types::{ErrorCode, OpPayload, ProcessResult, Transaction};

/// The parsed payload plus its position in the chain. Positions are what
/// make the operation log ordering canonical, so they travel with the
/// operation rather than being re-derived.
pub struct Operation<'a> {
    pub payload: &'a OpPayload,
    pub tx: &'a Transaction,
    pub block_height: i32,
    pub block_hash: &'a str,
    pub block_time: u64,
    pub tx_index: u32,
    pub sub_index: u32,
}

/// Contract every processor implements. `process` must be deterministic
/// for a given (operation, context) pair; the only permitted I/O is
/// through the Context (store reads and oracle calls).
pub trait OpProcessor: Send + Sync {
    fn op_tag(&self) -> &'static str;
    fn process(&self, op: &Operation, ctx: &Context) -> ProcessResult;
}

/// A store read failing mid-validation aborts the block rather than
/// guessing at state.
pub(crate) fn store_failure(e: StoreError) -> ProcessResult {
    ProcessResult::transient(ErrorCode::StoreConflict, e.to_string())
}

/// Required string field out of the payload extras.
pub(crate) fn require_string_field<'a>(
    payload: &'a OpPayload,
    key: &str,
) -> Result<&'a str, ErrorCode> {
    match payload.extra.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(_) => Err(ErrorCode::InvalidAmount),
        None => Err(ErrorCode::MissingField),
    }
}

/// Optional string field; present-but-not-a-string is an error, absence is
/// fine.
pub(crate) fn optional_string_field<'a>(
    payload: &'a OpPayload,
    key: &str,
) -> Result<Option<&'a str>, ErrorCode> {
    match payload.extra.get(key) {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ErrorCode::InvalidAmount),
        None => Ok(None),
    }
}
