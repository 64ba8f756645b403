/// Column Family Key Helpers
///
/// Centralized helpers for consistent key format handling.
///
/// KEY FORMATS:
/// - balances:         ticker + 0x00 + address          -> u128 LE amount
/// - deploys:          ticker                           -> bincode DeployRecord
/// - supplies:         ticker                           -> bincode SupplyState
/// - op_log:           id u64 BE                        -> bincode OpLogEntry
/// - op_log_index:     height u32 BE + tx u32 BE + sub u32 BE -> id u64 LE
/// - processed_blocks: height u32 BE                    -> bincode ProcessedBlock
/// - legacy_tokens:    ticker                           -> bincode LegacyTokenRecord
///
/// Composite keys use big-endian integers so lexicographic key order equals
/// numeric order; iterating op_log_index yields the canonical
/// (height, tx_index, sub_index) sequence.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

/// Separator between ticker and address in balance keys. Tickers are
/// normalized [A-Z0-9_], so 0x00 can never appear inside one.
const KEY_SEP: u8 = 0x00;

/// Build a balances CF key. Ticker-first layout doubles as the secondary
/// index on ticker: a prefix scan over `balance_ticker_prefix` walks every
/// holder of one token.
pub fn balance_key(ticker: &str, address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ticker.len() + 1 + address.len());
    key.extend_from_slice(ticker.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(address.as_bytes());
    key
}

/// Prefix covering all balances of one ticker.
pub fn balance_ticker_prefix(ticker: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(ticker.len() + 1);
    prefix.extend_from_slice(ticker.as_bytes());
    prefix.push(KEY_SEP);
    prefix
}

/// Split a balances CF key back into (ticker, address).
pub fn parse_balance_key(key: &[u8]) -> Option<(String, String)> {
    let sep = key.iter().position(|&b| b == KEY_SEP)?;
    let ticker = String::from_utf8(key[..sep].to_vec()).ok()?;
    let address = String::from_utf8(key[sep + 1..].to_vec()).ok()?;
    Some((ticker, address))
}

pub fn op_log_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub fn parse_op_log_key(key: &[u8]) -> Option<u64> {
    let mut cursor = Cursor::new(key);
    let id = cursor.read_u64::<BigEndian>().ok()?;
    if key.len() != 8 {
        return None;
    }
    Some(id)
}

pub fn op_log_index_key(height: i32, tx_index: u32, sub_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&(height as u32).to_be_bytes());
    key.extend_from_slice(&tx_index.to_be_bytes());
    key.extend_from_slice(&sub_index.to_be_bytes());
    key
}

/// Prefix covering every op_log_index row of one block.
pub fn op_log_index_height_prefix(height: i32) -> Vec<u8> {
    (height as u32).to_be_bytes().to_vec()
}

pub fn parse_op_log_index_key(key: &[u8]) -> Option<(i32, u32, u32)> {
    if key.len() != 12 {
        return None;
    }
    let mut cursor = Cursor::new(key);
    let height = cursor.read_u32::<BigEndian>().ok()? as i32;
    let tx_index = cursor.read_u32::<BigEndian>().ok()?;
    let sub_index = cursor.read_u32::<BigEndian>().ok()?;
    Some((height, tx_index, sub_index))
}

pub fn processed_block_key(height: i32) -> Vec<u8> {
    (height as u32).to_be_bytes().to_vec()
}

pub fn parse_processed_block_key(key: &[u8]) -> Option<i32> {
    if key.len() != 4 {
        return None;
    }
    let mut cursor = Cursor::new(key);
    Some(cursor.read_u32::<BigEndian>().ok()? as i32)
}
