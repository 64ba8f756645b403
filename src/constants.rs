/// Protocol and Storage Constants
///
/// These constants ensure consistent handling of protocol limits and column
/// family names across the codebase. All limit logic should use these
/// constants instead of magic numbers.

/// Column families opened by the indexer and every tool binary.
pub const COLUMN_FAMILIES: [&str; 8] = [
    "balances",
    "deploys",
    "supplies",
    "op_log",
    "op_log_index",
    "processed_blocks",
    "legacy_tokens",
    "chain_state",
];

/// Protocol family tag expected in the payload `p` field.
pub const DEFAULT_PROTOCOL_TAG: &str = "brc-20";

/// Default OP_RETURN payload size cap in bytes (standard relay policy).
pub const DEFAULT_PAYLOAD_MAX_BYTES: usize = 520;

/// Hard cap on operations carried by a single transaction, counting all
/// OP_RETURN outputs together. Operations past the cap are logged invalid.
pub const MAX_OPS_PER_TX: usize = 16;

/// Ticker length bounds in bytes after normalization.
pub const TICKER_MIN_LEN: usize = 1;
pub const TICKER_MAX_LEN: usize = 8;

/// Decimals bounds for a deploy. Default applies when `dec` is omitted.
pub const DECIMALS_MAX: u8 = 18;
pub const DECIMALS_DEFAULT: u8 = 18;

/// Largest representable amount in base units. Amounts are stored as u128
/// but deltas are signed i128, so parsed values must fit in i128.
pub const AMOUNT_MAX: u128 = i128::MAX as u128;

/// OP_RETURN opcode and pushdata opcodes recognized by the payload scanner.
pub const OP_RETURN: u8 = 0x6a;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;

/// Keys in the chain_state column family.
pub const KEY_INDEXED_TIP: &[u8] = b"indexed_tip";
pub const KEY_OP_LOG_NEXT_ID: &[u8] = b"op_log_next_id";

/// Built-in operation tags.
pub const OP_TAG_DEPLOY: &str = "deploy";
pub const OP_TAG_MINT: &str = "mint";
pub const OP_TAG_TRANSFER: &str = "transfer";
pub const OP_TAG_NO_RETURN: &str = "no_return";

/// Check if an opcode byte is a direct pushdata length (OP_1 through OP_75).
#[inline]
pub fn is_direct_push(opcode: u8) -> bool {
    opcode >= 0x01 && opcode <= 0x4b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_families_unique() {
        let mut names: Vec<&str> = COLUMN_FAMILIES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), COLUMN_FAMILIES.len());
    }

    #[test]
    fn test_direct_push_range() {
        assert!(!is_direct_push(0x00));
        assert!(is_direct_push(0x01));
        assert!(is_direct_push(0x4b));
        assert!(!is_direct_push(OP_PUSHDATA1));
        assert!(!is_direct_push(OP_RETURN));
    }

    #[test]
    fn test_amount_max_fits_signed() {
        assert!(AMOUNT_MAX <= i128::MAX as u128);
    }
}
