/// Transactional Store
///
/// The core sees an abstract `Store`: point reads, prefix scans, and staged
/// transactions committed as one atomic unit. The production backend is
/// RocksDB with named column families; a whole transaction lands in a single
/// `WriteBatch`, so either every write across every column family succeeds
/// or none do. Rollback is simply dropping the staged batch.
///
/// Reads during a transaction go through a read-your-writes overlay so the
/// commit engine sees its own staged values.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use crate::constants::{COLUMN_FAMILIES, KEY_INDEXED_TIP, KEY_OP_LOG_NEXT_ID};
use crate::keys;
use crate::types::{
    ChainTip, DeployRecord, LegacyTokenRecord, OpLogEntry, ProcessedBlock, SupplyState,
};

#[derive(Debug, Clone)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        StoreError {
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "store error: {}", self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::new(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::new(format!("codec: {}", e))
    }
}

#[derive(Clone)]
enum BatchOp {
    Put {
        cf: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: &'static str,
        key: Vec<u8>,
    },
}

/// Staged writes forming one transaction. Nothing touches the engine until
/// `Store::commit_tx`; dropping the batch is a rollback.
#[derive(Default)]
pub struct StoreBatch {
    ops: Vec<BatchOp>,
    overlay: HashMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
}

impl StoreBatch {
    pub fn new() -> Self {
        StoreBatch::default()
    }

    pub fn put(&mut self, cf: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.overlay
            .insert((cf, key.clone()), Some(value.clone()));
        self.ops.push(BatchOp::Put { cf, key, value });
    }

    pub fn delete(&mut self, cf: &'static str, key: Vec<u8>) {
        self.overlay.insert((cf, key.clone()), None);
        self.ops.push(BatchOp::Delete { cf, key });
    }

    /// Read through the overlay, falling back to committed state.
    pub fn get_through(
        &self,
        store: &dyn Store,
        cf: &'static str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.overlay.get(&(cf, key.to_vec())) {
            return Ok(staged.clone());
        }
        store.get(cf, key)
    }

    /// Append a log entry with its id already assigned: one row in op_log,
    /// one in the composite index.
    pub fn append_log(&mut self, entry: &OpLogEntry) -> Result<(), StoreError> {
        let encoded = bincode::serialize(entry)?;
        self.put("op_log", keys::op_log_key(entry.id), encoded);
        self.put(
            "op_log_index",
            keys::op_log_index_key(entry.block_height, entry.tx_index, entry.sub_index),
            entry.id.to_le_bytes().to_vec(),
        );
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.ops.len()
    }

    /// Discard all staged operations without writing.
    pub fn rollback(self) {}
}

/// Abstract transactional store capability.
pub trait Store: Send + Sync {
    fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All rows whose key starts with `prefix`, in key order.
    fn prefix_scan(
        &self,
        cf: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply a staged transaction atomically.
    fn commit_tx(&self, batch: StoreBatch) -> Result<(), StoreError>;

    fn begin_tx(&self) -> StoreBatch {
        StoreBatch::new()
    }
}

/// RocksDB-backed store. The indexer is the single writer; readers get at
/// least per-commit snapshot consistency because every block is one
/// WriteBatch.
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    pub fn new(db: Arc<DB>) -> Self {
        RocksDbStore { db }
    }

    pub fn db(&self) -> Arc<DB> {
        Arc::clone(&self.db)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::new(format!("column family not found: {}", name)))
    }
}

impl Store for RocksDbStore {
    fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let handle = self.cf(cf)?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    fn prefix_scan(
        &self,
        cf: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let handle = self.cf(cf)?;
        let mut rows = Vec::new();
        for item in self.db.prefix_iterator_cf(&handle, prefix) {
            let (key, value) = item?;
            // prefix_iterator can run past the prefix range
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    fn commit_tx(&self, batch: StoreBatch) -> Result<(), StoreError> {
        if batch.ops.is_empty() {
            return Ok(());
        }
        let mut write_batch = WriteBatch::default();
        for op in &batch.ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = self.cf(cf)?;
                    write_batch.put_cf(&handle, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    let handle = self.cf(cf)?;
                    write_batch.delete_cf(&handle, key);
                }
            }
        }
        // Single atomic commit for all column families
        self.db.write(write_batch)?;
        Ok(())
    }
}

/// Typed reads over committed state. Blanket-implemented for every Store so
/// both the production backend and test stores get them for free.
pub trait StateReader: Send + Sync {
    fn balance(&self, address: &str, ticker: &str) -> Result<u128, StoreError>;
    fn deploy(&self, ticker: &str) -> Result<Option<DeployRecord>, StoreError>;
    fn supply(&self, ticker: &str) -> Result<SupplyState, StoreError>;
    fn legacy_token(&self, ticker: &str) -> Result<Option<LegacyTokenRecord>, StoreError>;
}

impl<S: Store + ?Sized> StateReader for S {
    fn balance(&self, address: &str, ticker: &str) -> Result<u128, StoreError> {
        match self.get("balances", &keys::balance_key(ticker, address))? {
            Some(bytes) => decode_balance(&bytes),
            None => Ok(0),
        }
    }

    fn deploy(&self, ticker: &str) -> Result<Option<DeployRecord>, StoreError> {
        match self.get("deploys", ticker.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn supply(&self, ticker: &str) -> Result<SupplyState, StoreError> {
        match self.get("supplies", ticker.as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(SupplyState::default()),
        }
    }

    fn legacy_token(&self, ticker: &str) -> Result<Option<LegacyTokenRecord>, StoreError> {
        match self.get("legacy_tokens", ticker.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

pub fn encode_balance(amount: u128) -> Vec<u8> {
    amount.to_le_bytes().to_vec()
}

pub fn decode_balance(bytes: &[u8]) -> Result<u128, StoreError> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::new("balance value is not 16 bytes"))?;
    Ok(u128::from_le_bytes(arr))
}

/// Indexed tip recorded in chain_state, if any block has been committed.
pub fn read_indexed_tip(store: &dyn Store) -> Result<Option<ChainTip>, StoreError> {
    match store.get("chain_state", KEY_INDEXED_TIP)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

pub fn read_processed_block(
    store: &dyn Store,
    height: i32,
) -> Result<Option<ProcessedBlock>, StoreError> {
    match store.get("processed_blocks", &keys::processed_block_key(height))? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Log entries of one block in canonical (tx_index, sub_index) order, via
/// the composite index. Used by diagnostics tools.
pub fn read_log_for_height(
    store: &dyn Store,
    height: i32,
) -> Result<Vec<OpLogEntry>, StoreError> {
    let mut entries = Vec::new();
    for (_key, value) in
        store.prefix_scan("op_log_index", &keys::op_log_index_height_prefix(height))?
    {
        let arr: [u8; 8] = value
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::new("op_log_index value is not 8 bytes"))?;
        let id = u64::from_le_bytes(arr);
        match store.get("op_log", &keys::op_log_key(id))? {
            Some(bytes) => entries.push(bincode::deserialize(&bytes)?),
            None => {
                return Err(StoreError::new(format!(
                    "op_log_index points at missing entry {}",
                    id
                )))
            }
        }
    }
    Ok(entries)
}

/// Next operation-log id. Starts at 1 so id 0 can mean "unassigned".
pub fn read_next_log_id(store: &dyn Store) -> Result<u64, StoreError> {
    match store.get("chain_state", KEY_OP_LOG_NEXT_ID)? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::new("op_log_next_id is not 8 bytes"))?;
            Ok(u64::from_le_bytes(arr))
        }
        None => Ok(1),
    }
}

/// Open the indexer database, creating missing column families. Options
/// follow the write-heavy tuning used for initial sync.
pub fn open_db(path: &str) -> Result<Arc<DB>, StoreError> {
    let mut cf_descriptors = vec![ColumnFamilyDescriptor::new("default", Options::default())];
    for cf in COLUMN_FAMILIES.iter() {
        cf_descriptors.push(ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
    }

    let mut db_options = Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);

    // Write buffer optimizations
    db_options.set_write_buffer_size(256 * 1024 * 1024);
    db_options.set_max_write_buffer_number(4);
    db_options.set_min_write_buffer_number_to_merge(2);

    // File size and compaction
    db_options.set_target_file_size_base(256 * 1024 * 1024);
    db_options.set_level_zero_file_num_compaction_trigger(8);
    db_options.set_max_background_jobs(8);

    // Compression
    db_options.set_compression_type(rocksdb::DBCompressionType::Lz4);

    db_options.increase_parallelism(8);

    let db = DB::open_cf_descriptors(&db_options, path, cf_descriptors)?;
    Ok(Arc::new(db))
}

/// Read-only open for diagnostics tools, so they can run next to a live
/// indexer.
pub fn open_db_read_only(path: impl AsRef<Path>) -> Result<Arc<DB>, StoreError> {
    let mut cf_names = vec!["default"];
    cf_names.extend(COLUMN_FAMILIES.iter().copied());
    let opts = Options::default();
    let db = DB::open_cf_for_read_only(&opts, path, &cf_names, false)?;
    Ok(Arc::new(db))
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use tempfile::TempDir;

    /// Create a temporary RocksDB-backed store for testing
    pub fn create_test_store() -> (Arc<RocksDbStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut cf_names = vec!["default"];
        cf_names.extend(COLUMN_FAMILIES.iter().copied());
        let db = DB::open_cf(&opts, temp_dir.path(), &cf_names).unwrap();
        (Arc::new(RocksDbStore::new(Arc::new(db))), temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::create_test_store;
    use super::*;

    #[test]
    fn test_commit_is_atomic_across_cfs() {
        let (store, _temp) = create_test_store();
        let mut batch = store.begin_tx();
        batch.put("balances", b"k1".to_vec(), encode_balance(7));
        batch.put("supplies", b"k2".to_vec(), b"v2".to_vec());
        batch.put("chain_state", b"k3".to_vec(), b"v3".to_vec());
        store.commit_tx(batch).unwrap();

        assert_eq!(store.get("balances", b"k1").unwrap().unwrap(), encode_balance(7));
        assert_eq!(store.get("supplies", b"k2").unwrap().unwrap(), b"v2");
        assert_eq!(store.get("chain_state", b"k3").unwrap().unwrap(), b"v3");
    }

    #[test]
    fn test_rollback_writes_nothing() {
        let (store, _temp) = create_test_store();
        let mut batch = store.begin_tx();
        batch.put("balances", b"k1".to_vec(), encode_balance(7));
        batch.rollback();
        assert!(store.get("balances", b"k1").unwrap().is_none());
    }

    #[test]
    fn test_overlay_read_your_writes() {
        let (store, _temp) = create_test_store();
        let mut setup = store.begin_tx();
        setup.put("balances", b"k".to_vec(), encode_balance(1));
        store.commit_tx(setup).unwrap();

        let mut batch = store.begin_tx();
        assert_eq!(
            batch.get_through(store.as_ref(), "balances", b"k").unwrap(),
            Some(encode_balance(1))
        );
        batch.put("balances", b"k".to_vec(), encode_balance(2));
        assert_eq!(
            batch.get_through(store.as_ref(), "balances", b"k").unwrap(),
            Some(encode_balance(2))
        );
        batch.delete("balances", b"k".to_vec());
        assert_eq!(
            batch.get_through(store.as_ref(), "balances", b"k").unwrap(),
            None
        );
    }

    #[test]
    fn test_prefix_scan_bounds() {
        let (store, _temp) = create_test_store();
        let mut batch = store.begin_tx();
        batch.put(
            "balances",
            keys::balance_key("ALFA", "addr1"),
            encode_balance(1),
        );
        batch.put(
            "balances",
            keys::balance_key("ALFA", "addr2"),
            encode_balance(2),
        );
        batch.put(
            "balances",
            keys::balance_key("ALFAB", "addr3"),
            encode_balance(3),
        );
        store.commit_tx(batch).unwrap();

        let rows = store
            .prefix_scan("balances", &keys::balance_ticker_prefix("ALFA"))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_state_reader_defaults() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.balance("addr", "ALFA").unwrap(), 0);
        assert!(store.deploy("ALFA").unwrap().is_none());
        assert_eq!(store.supply("ALFA").unwrap(), SupplyState::default());
        assert!(read_indexed_tip(store.as_ref()).unwrap().is_none());
        assert_eq!(read_next_log_id(store.as_ref()).unwrap(), 1);
    }

    #[test]
    fn test_append_log_writes_both_rows() {
        let (store, _temp) = create_test_store();
        let entry = OpLogEntry {
            id: 5,
            txid: "cd".repeat(32),
            op: "mint".into(),
            ticker: Some("ALFA".into()),
            amount: Some(10),
            block_height: 100,
            block_hash: "ab".repeat(32),
            tx_index: 2,
            sub_index: 0,
            from_address: None,
            to_address: Some("addr".into()),
            valid: true,
            error_code: None,
            timestamp: 1_700_000_000,
        };
        let mut batch = store.begin_tx();
        batch.append_log(&entry).unwrap();
        store.commit_tx(batch).unwrap();

        let stored = store.get("op_log", &keys::op_log_key(5)).unwrap().unwrap();
        let decoded: OpLogEntry = bincode::deserialize(&stored).unwrap();
        assert_eq!(decoded, entry);

        let index = store
            .get("op_log_index", &keys::op_log_index_key(100, 2, 0))
            .unwrap()
            .unwrap();
        assert_eq!(u64::from_le_bytes(index.as_slice().try_into().unwrap()), 5);

        let entries = read_log_for_height(store.as_ref(), 100).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 5);
        assert!(read_log_for_height(store.as_ref(), 101).unwrap().is_empty());
    }
}
