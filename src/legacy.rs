/// Legacy Bridge - Cross-namespace validation
///
/// The inscription-based ("legacy") token namespace lives outside this
/// indexer and is reachable only through the LegacyOracle capability. The
/// bridge wraps that capability with the deploy cross-check policy, a
/// positive-result cache, and the no-return event matching used to credit
/// legacy burns.
///
/// Policy: with `require_legacy = true` an unreachable oracle defers the
/// block (transient retry, nothing committed). With `require_legacy = false`
/// the deploy proceeds but is recorded with `legacy_validated = false` for
/// later audit. The decision depends only on configuration and oracle
/// response, never on local wall-clock state.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::store::{StateReader, Store};
use crate::types::{LegacyTokenRecord, LegacyTransferEvent};

/// Oracle calls either answer or are unavailable; there is no partial
/// answer. Unavailability is always transient from the caller's view.
#[derive(Debug, Clone)]
pub struct OracleError {
    pub message: String,
}

impl OracleError {
    pub fn new(message: impl Into<String>) -> Self {
        OracleError {
            message: message.into(),
        }
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "oracle unavailable: {}", self.message)
    }
}

impl std::error::Error for OracleError {}

/// Capability supplied to the core. Both calls are idempotent; responses
/// for a given (ticker | txid) must be stable across retries.
pub trait LegacyOracle: Send + Sync {
    fn lookup_ticker(&self, ticker: &str) -> Result<Option<LegacyTokenRecord>, OracleError>;
    fn transfer_events_for_tx(&self, txid: &str)
        -> Result<Vec<LegacyTransferEvent>, OracleError>;
}

/// Result of the deploy cross-check.
#[derive(Debug, Clone)]
pub enum DeployCrossCheck {
    /// No legacy token with this ticker. `validated` is false when the
    /// oracle was skipped or unreachable under the permissive policy.
    Clear {
        validated: bool,
        snapshot: Option<LegacyTokenRecord>,
    },
    /// A legacy token exists; the deploy must be rejected.
    Exists(LegacyTokenRecord),
    /// Oracle unreachable and require_legacy is set: defer the block.
    Deferred(String),
}

pub struct LegacyBridge {
    oracle: Arc<dyn LegacyOracle>,
    store: Arc<dyn Store>,
    require_legacy: bool,
}

impl LegacyBridge {
    pub fn new(oracle: Arc<dyn LegacyOracle>, store: Arc<dyn Store>, require_legacy: bool) -> Self {
        LegacyBridge {
            oracle,
            store,
            require_legacy,
        }
    }

    pub fn require_legacy(&self) -> bool {
        self.require_legacy
    }

    /// Cross-check a deploy against the legacy namespace.
    ///
    /// Positive oracle answers are cached in the legacy_tokens column
    /// family: once a legacy token exists it exists at every later height,
    /// so replay does not depend on oracle availability for known tickers.
    /// Negative answers are never cached.
    pub fn check_deploy(&self, ticker: &str) -> DeployCrossCheck {
        match self.store.legacy_token(ticker) {
            Ok(Some(cached)) => return DeployCrossCheck::Exists(cached),
            Ok(None) => {}
            Err(e) => {
                return DeployCrossCheck::Deferred(format!("legacy cache read failed: {}", e))
            }
        }

        match self.oracle.lookup_ticker(ticker) {
            Ok(Some(mut record)) => {
                record.last_verified_at = unix_now();
                self.cache_record(&record);
                DeployCrossCheck::Exists(record)
            }
            Ok(None) => DeployCrossCheck::Clear {
                validated: true,
                snapshot: None,
            },
            Err(e) if self.require_legacy => DeployCrossCheck::Deferred(e.message),
            Err(e) => {
                tracing::warn!(ticker = ticker, error = %e, "oracle unreachable, deploy proceeds unvalidated");
                DeployCrossCheck::Clear {
                    validated: false,
                    snapshot: None,
                }
            }
        }
    }

    /// Legacy token record for a ticker, cache first.
    pub fn lookup_ticker(&self, ticker: &str) -> Result<Option<LegacyTokenRecord>, OracleError> {
        if let Ok(Some(cached)) = self.store.legacy_token(ticker) {
            return Ok(Some(cached));
        }
        match self.oracle.lookup_ticker(ticker)? {
            Some(mut record) => {
                record.last_verified_at = unix_now();
                self.cache_record(&record);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Inscription-based transfers credited in a transaction.
    pub fn transfer_events_for_tx(
        &self,
        txid: &str,
    ) -> Result<Vec<LegacyTransferEvent>, OracleError> {
        self.oracle.transfer_events_for_tx(txid)
    }

    fn cache_record(&self, record: &LegacyTokenRecord) {
        let encoded = match bincode::serialize(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(ticker = %record.ticker, error = %e, "could not encode legacy record");
                return;
            }
        };
        let mut batch = self.store.begin_tx();
        batch.put("legacy_tokens", record.ticker.as_bytes().to_vec(), encoded);
        if let Err(e) = self.store.commit_tx(batch) {
            // Cache only; a failed write costs a future oracle round-trip.
            tracing::warn!(ticker = %record.ticker, error = %e, "could not cache legacy record");
        }
    }
}

/// Match a no-return operation against the oracle's transfer events for the
/// transaction: exact (ticker, amount, sender) match, skipping events
/// already consumed by an earlier operation in the same block.
pub fn match_transfer_event<'a>(
    events: &'a [LegacyTransferEvent],
    ticker: &str,
    amount: u128,
    sender: &str,
    consumed: &HashSet<String>,
) -> Option<&'a LegacyTransferEvent> {
    events.iter().find(|event| {
        event.ticker == ticker
            && event.amount == amount
            && event.sender_address == sender
            && !consumed.contains(&event.inscription_id)
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Oracle for deployments that run without a legacy endpoint: every ticker
/// is clear and no transfer events exist.
pub struct NullLegacyOracle;

impl LegacyOracle for NullLegacyOracle {
    fn lookup_ticker(&self, _ticker: &str) -> Result<Option<LegacyTokenRecord>, OracleError> {
        Ok(None)
    }

    fn transfer_events_for_tx(
        &self,
        _txid: &str,
    ) -> Result<Vec<LegacyTransferEvent>, OracleError> {
        Ok(Vec::new())
    }
}

/// HTTP oracle client. Blocking reqwest with a per-call timeout; callers
/// run it inside spawn_blocking like every other network adapter here.
pub struct HttpLegacyOracle {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpLegacyOracle {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::new(e.to_string()))?;
        Ok(HttpLegacyOracle {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl LegacyOracle for HttpLegacyOracle {
    fn lookup_ticker(&self, ticker: &str) -> Result<Option<LegacyTokenRecord>, OracleError> {
        let url = format!("{}/v1/ticker/{}", self.base_url, ticker);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| OracleError::new(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(OracleError::new(format!(
                "ticker lookup returned {}",
                response.status()
            )));
        }
        let record: LegacyTokenRecord = response
            .json()
            .map_err(|e| OracleError::new(format!("ticker lookup decode: {}", e)))?;
        Ok(Some(record))
    }

    fn transfer_events_for_tx(
        &self,
        txid: &str,
    ) -> Result<Vec<LegacyTransferEvent>, OracleError> {
        let url = format!("{}/v1/tx/{}/transfers", self.base_url, txid);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| OracleError::new(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OracleError::new(format!(
                "transfer lookup returned {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| OracleError::new(format!("transfer lookup decode: {}", e)))
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted oracle for tests: fixed ticker records, fixed per-tx
    /// events, and a switch to simulate an outage.
    pub struct MockLegacyOracle {
        pub tickers: Mutex<HashMap<String, LegacyTokenRecord>>,
        pub events: Mutex<HashMap<String, Vec<LegacyTransferEvent>>>,
        pub available: Mutex<bool>,
    }

    impl MockLegacyOracle {
        pub fn new() -> Self {
            MockLegacyOracle {
                tickers: Mutex::new(HashMap::new()),
                events: Mutex::new(HashMap::new()),
                available: Mutex::new(true),
            }
        }

        pub fn with_ticker(self, record: LegacyTokenRecord) -> Self {
            self.tickers
                .lock()
                .unwrap()
                .insert(record.ticker.clone(), record);
            self
        }

        pub fn set_available(&self, available: bool) {
            *self.available.lock().unwrap() = available;
        }

        pub fn add_events(&self, txid: &str, events: Vec<LegacyTransferEvent>) {
            self.events.lock().unwrap().insert(txid.to_string(), events);
        }
    }

    impl LegacyOracle for MockLegacyOracle {
        fn lookup_ticker(
            &self,
            ticker: &str,
        ) -> Result<Option<LegacyTokenRecord>, OracleError> {
            if !*self.available.lock().unwrap() {
                return Err(OracleError::new("connection refused"));
            }
            Ok(self.tickers.lock().unwrap().get(ticker).cloned())
        }

        fn transfer_events_for_tx(
            &self,
            txid: &str,
        ) -> Result<Vec<LegacyTransferEvent>, OracleError> {
            if !*self.available.lock().unwrap() {
                return Err(OracleError::new("connection refused"));
            }
            Ok(self
                .events
                .lock()
                .unwrap()
                .get(txid)
                .cloned()
                .unwrap_or_default())
        }
    }

    pub fn legacy_record(ticker: &str) -> LegacyTokenRecord {
        LegacyTokenRecord {
            ticker: ticker.to_string(),
            max_supply: 21_000_000,
            decimals: 18,
            limit_per_mint: Some(1000),
            deploy_inscription_id: format!("{}i0", "ef".repeat(32)),
            deploy_height: 779_832,
            deployer_address: "bc1qlegacy".to_string(),
            last_verified_at: 0,
        }
    }
}
