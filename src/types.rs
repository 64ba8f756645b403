/// Core data model shared across the indexer.
///
/// Amounts are exact integers in base units (u128), deltas are signed i128.
/// No floating point anywhere in state math. Heights follow the node's
/// convention (i32, genesis = 0); block hashes and txids are lowercase hex
/// strings in display order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable error codes surfaced in the operation log and in fatal/transient
/// failures. The code string is part of the external contract: it must not
/// change between releases or replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Structural
    MalformedJson,
    UnsupportedEncoding,
    MissingField,
    UnknownOp,
    PayloadTooLarge,
    // Protocol
    InvalidTicker,
    InvalidAmount,
    TickerAlreadyDeployed,
    TickerNotDeployed,
    MintExceedsLimit,
    MintExceedsSupply,
    InsufficientBalance,
    UnresolvableSender,
    UnresolvableReceiver,
    // Cross-namespace
    LegacyTokenExists,
    LegacyLookupRequiredButUnavailable,
    LegacyEventNotFound,
    // Transient
    NodeUnavailable,
    OracleUnavailable,
    StoreConflict,
    // Fatal
    ReorgIrrecoverable,
    CommitChecksumMismatch,
    DuplicateProcessorRegistration,
    ConfigInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedJson => "MALFORMED_JSON",
            ErrorCode::UnsupportedEncoding => "UNSUPPORTED_ENCODING",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::UnknownOp => "UNKNOWN_OP",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::InvalidTicker => "INVALID_TICKER",
            ErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ErrorCode::TickerAlreadyDeployed => "TICKER_ALREADY_DEPLOYED",
            ErrorCode::TickerNotDeployed => "TICKER_NOT_DEPLOYED",
            ErrorCode::MintExceedsLimit => "MINT_EXCEEDS_LIMIT",
            ErrorCode::MintExceedsSupply => "MINT_EXCEEDS_SUPPLY",
            ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorCode::UnresolvableSender => "UNRESOLVABLE_SENDER",
            ErrorCode::UnresolvableReceiver => "UNRESOLVABLE_RECEIVER",
            ErrorCode::LegacyTokenExists => "LEGACY_TOKEN_EXISTS",
            ErrorCode::LegacyLookupRequiredButUnavailable => {
                "LEGACY_LOOKUP_REQUIRED_BUT_UNAVAILABLE"
            }
            ErrorCode::LegacyEventNotFound => "LEGACY_EVENT_NOT_FOUND",
            ErrorCode::NodeUnavailable => "NODE_UNAVAILABLE",
            ErrorCode::OracleUnavailable => "ORACLE_UNAVAILABLE",
            ErrorCode::StoreConflict => "STORE_CONFLICT",
            ErrorCode::ReorgIrrecoverable => "REORG_IRRECOVERABLE",
            ErrorCode::CommitChecksumMismatch => "COMMIT_CHECKSUM_MISMATCH",
            ErrorCode::DuplicateProcessorRegistration => "DUPLICATE_PROCESSOR_REGISTRATION",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that abort a block (transient, retried with backoff) or stop the
/// indexer entirely (fatal, operator action required). Protocol-level
/// rejections never become an IndexError; they become invalid log entries.
#[derive(Debug, Clone)]
pub enum IndexError {
    Transient { code: ErrorCode, message: String },
    Fatal { code: ErrorCode, message: String },
}

impl IndexError {
    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        IndexError::Transient {
            code,
            message: message.into(),
        }
    }

    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        IndexError::Fatal {
            code,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Transient { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            IndexError::Transient { code, .. } => *code,
            IndexError::Fatal { code, .. } => *code,
        }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IndexError::Transient { code, message } => {
                write!(f, "transient {}: {}", code, message)
            }
            IndexError::Fatal { code, message } => write!(f, "fatal {}: {}", code, message),
        }
    }
}

impl std::error::Error for IndexError {}

/// Chain tip as reported by the node or recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: i32,
    pub hash: String,
}

/// A transaction input as supplied by the node. The address, when present,
/// is the canonical textual form of the previous output's owner; the core
/// never reconstructs addresses from scripts itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: Option<String>,
    pub prev_vout: Option<u32>,
    pub address: Option<String>,
    pub coinbase: bool,
}

/// A transaction output. `script` is the raw scriptPubKey bytes; `address`
/// is present only when the node could derive one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxOutput {
    pub value_sats: u64,
    pub script: Vec<u8>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// A block fetched from the node, transactions in consensus order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: i32,
    pub hash: String,
    pub prev_hash: String,
    pub time: u64,
    pub transactions: Vec<Transaction>,
}

/// Parsed protocol payload from one OP_RETURN data push (or one element of a
/// top-level array). `extra` keeps the operation-specific fields (max, lim,
/// dec, amt) for the processor to interpret.
#[derive(Debug, Clone)]
pub struct OpPayload {
    pub p: String,
    pub op: String,
    pub tick: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub raw: Vec<u8>,
}

/// One deploy per ticker. `legacy_snapshot` preserves what the oracle
/// returned at validation time for later audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub ticker: String,
    pub max_supply: u128,
    pub limit_per_mint: Option<u128>,
    pub decimals: u8,
    pub deployer_address: String,
    pub deploy_txid: String,
    pub deploy_height: i32,
    pub deploy_tx_index: u32,
    pub timestamp: u64,
    pub legacy_validated: bool,
    pub legacy_snapshot: Option<LegacyTokenRecord>,
}

/// Per-ticker supply decomposition. `total = universal + legacy`;
/// `remaining = max_supply - total - burned` and must stay non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyState {
    pub universal_minted: u128,
    pub legacy_minted: u128,
    pub burned: u128,
}

impl SupplyState {
    pub fn total(&self) -> u128 {
        self.universal_minted.saturating_add(self.legacy_minted)
    }

    /// Committed units counting against max_supply.
    pub fn committed(&self) -> u128 {
        self.total().saturating_add(self.burned)
    }

    pub fn remaining(&self, max_supply: u128) -> u128 {
        max_supply.saturating_sub(self.committed())
    }
}

/// Which supply bucket a SupplyAdd targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SupplyBucket {
    Universal,
    Legacy,
    Burned,
}

/// Signed per-ticker supply deltas accumulated within a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyDelta {
    pub universal: i128,
    pub legacy: i128,
    pub burned: i128,
}

impl SupplyDelta {
    pub fn is_zero(&self) -> bool {
        self.universal == 0 && self.legacy == 0 && self.burned == 0
    }

    pub fn negated(&self) -> SupplyDelta {
        SupplyDelta {
            universal: -self.universal,
            legacy: -self.legacy,
            burned: -self.burned,
        }
    }
}

/// Append-only operation log entry. Written for every routed operation,
/// valid or not. `id` is assigned at commit time and is monotonic across
/// the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpLogEntry {
    pub id: u64,
    pub txid: String,
    pub op: String,
    pub ticker: Option<String>,
    pub amount: Option<u128>,
    pub block_height: i32,
    pub block_hash: String,
    pub tx_index: u32,
    pub sub_index: u32,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub valid: bool,
    pub error_code: Option<String>,
    pub timestamp: u64,
}

/// Denormalized cache of an external inscription-based deploy, as returned
/// by the legacy oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTokenRecord {
    pub ticker: String,
    pub max_supply: u128,
    pub decimals: u8,
    pub limit_per_mint: Option<u128>,
    pub deploy_inscription_id: String,
    pub deploy_height: i32,
    pub deployer_address: String,
    pub last_verified_at: u64,
}

/// An inscription-based transfer credited in a given transaction, as
/// reported by the legacy oracle. Amounts are base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTransferEvent {
    pub ticker: String,
    pub amount: u128,
    pub sender_address: String,
    pub inscription_id: String,
}

/// High-level state change proposed by a processor. Commands are
/// commutative by key within a block; the commit engine re-checks every
/// invariant before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    BalanceAdd {
        address: String,
        ticker: String,
        delta: u128,
    },
    BalanceSub {
        address: String,
        ticker: String,
        delta: u128,
    },
    DeployCreate {
        record: DeployRecord,
    },
    SupplyAdd {
        ticker: String,
        bucket: SupplyBucket,
        delta: u128,
    },
    /// Block-scoped marker: a legacy transfer event was consumed by a
    /// no-return operation, so a later operation in the same block cannot
    /// match it again. Not persisted; the burn itself is a SupplyAdd.
    LegacyEventConsumed {
        inscription_id: String,
    },
}

/// Outcome of processing one operation. Only Success applies updates;
/// Invalid produces a `valid=false` log entry and no state change;
/// Transient aborts the whole block and triggers retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Invalid(ErrorCode),
    Transient { code: ErrorCode, message: String },
}

/// Log metadata a processor resolved while validating (normalized ticker,
/// base-unit amount, endpoints). Merged into the log entry by the block
/// processor, which owns the positional fields.
#[derive(Debug, Clone, Default)]
pub struct LogFields {
    pub ticker: Option<String>,
    pub amount: Option<u128>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
}

/// Full result of one processor invocation.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: Outcome,
    pub updates: Vec<StateUpdate>,
    pub log: LogFields,
}

impl ProcessResult {
    pub fn invalid(code: ErrorCode, log: LogFields) -> Self {
        ProcessResult {
            outcome: Outcome::Invalid(code),
            updates: Vec::new(),
            log,
        }
    }

    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        ProcessResult {
            outcome: Outcome::Transient {
                code,
                message: message.into(),
            },
            updates: Vec::new(),
            log: LogFields::default(),
        }
    }

    pub fn success(updates: Vec<StateUpdate>, log: LogFields) -> Self {
        ProcessResult {
            outcome: Outcome::Success,
            updates,
            log,
        }
    }
}

/// The complete set of state changes derived from one block. Applied
/// atomically by the commit engine and persisted alongside the processed
/// block so the reorg handler can derive inverses.
///
/// Every map is a BTreeMap so that serialization is deterministic: the
/// commit checksum is a hash over the bincode encoding of this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPlan {
    pub height: i32,
    pub hash: String,
    pub prev_hash: String,
    pub block_time: u64,
    /// (address, ticker) -> signed delta in base units.
    pub balance_deltas: BTreeMap<(String, String), i128>,
    pub new_deploys: BTreeMap<String, DeployRecord>,
    pub supply_deltas: BTreeMap<String, SupplyDelta>,
    /// Log entries in canonical (tx_index, sub_index) order. Ids are zero
    /// until the commit engine assigns them.
    pub log_entries: Vec<OpLogEntry>,
}

/// Row persisted per processed block. The sequence of these rows forms the
/// indexed chain; the embedded plan is what reorg rollback inverts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedBlock {
    pub height: i32,
    pub hash: String,
    pub prev_hash: String,
    pub commit_checksum: Vec<u8>,
    pub committed_at: u64,
    pub plan: CommitPlan,
}
