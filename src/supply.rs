/// Supply Tracker
///
/// The supplies column family is the rollup; it is refreshed as part of
/// every commit and is never a second source of truth. Helpers here read
/// the decomposition back out, and recompute balance sums for invariant
/// checks in tests and the offline validator.

use crate::keys;
use crate::store::{decode_balance, StateReader, Store, StoreError};

/// Full per-ticker supply decomposition, resolved against the deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyInfo {
    pub ticker: String,
    pub max_supply: u128,
    pub universal_minted: u128,
    pub legacy_minted: u128,
    pub burned: u128,
    pub total: u128,
    pub remaining: u128,
}

/// Supply decomposition for a deployed ticker, or None when the ticker is
/// unknown in the universal namespace.
pub fn supply_info(store: &dyn Store, ticker: &str) -> Result<Option<SupplyInfo>, StoreError> {
    let deploy = match store.deploy(ticker)? {
        Some(d) => d,
        None => return Ok(None),
    };
    let supply = store.supply(ticker)?;
    Ok(Some(SupplyInfo {
        ticker: ticker.to_string(),
        max_supply: deploy.max_supply,
        universal_minted: supply.universal_minted,
        legacy_minted: supply.legacy_minted,
        burned: supply.burned,
        total: supply.total(),
        remaining: supply.remaining(deploy.max_supply),
    }))
}

/// Sum of every address balance for a ticker, straight off the balances
/// column family.
pub fn balance_sum(store: &dyn Store, ticker: &str) -> Result<u128, StoreError> {
    let mut sum: u128 = 0;
    for (_key, value) in store.prefix_scan("balances", &keys::balance_ticker_prefix(ticker))? {
        sum = sum
            .checked_add(decode_balance(&value)?)
            .ok_or_else(|| StoreError::new("balance sum overflow"))?;
    }
    Ok(sum)
}

/// Check the universal invariants for one ticker:
/// 1. sum of balances == universal_minted
/// 2. universal + legacy + burned <= max_supply
pub fn verify_ticker(store: &dyn Store, ticker: &str) -> Result<(), String> {
    let info = match supply_info(store, ticker).map_err(|e| e.to_string())? {
        Some(info) => info,
        None => return Err(format!("{}: not deployed", ticker)),
    };

    let sum = balance_sum(store, ticker).map_err(|e| e.to_string())?;
    if sum != info.universal_minted {
        return Err(format!(
            "{}: balance sum {} != universal_minted {}",
            ticker, sum, info.universal_minted
        ));
    }

    let committed = info
        .universal_minted
        .checked_add(info.legacy_minted)
        .and_then(|v| v.checked_add(info.burned))
        .ok_or_else(|| format!("{}: supply overflow", ticker))?;
    if committed > info.max_supply {
        return Err(format!(
            "{}: universal {} + legacy {} + burned {} exceeds max_supply {}",
            ticker, info.universal_minted, info.legacy_minted, info.burned, info.max_supply
        ));
    }

    Ok(())
}

/// All deployed tickers, for the offline validator.
pub fn all_tickers(store: &dyn Store) -> Result<Vec<String>, StoreError> {
    let mut tickers = Vec::new();
    for (key, _value) in store.prefix_scan("deploys", b"")? {
        if let Ok(ticker) = String::from_utf8(key) {
            tickers.push(ticker);
        }
    }
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{deploy_record, put_balance, put_deploy, put_supply, test_store};
    use crate::types::SupplyState;

    #[test]
    fn test_supply_info_and_invariants() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, Some(10), 0));
        put_supply(
            store.as_ref(),
            "ALFA",
            SupplyState {
                universal_minted: 30,
                legacy_minted: 5,
                burned: 2,
            },
        );
        put_balance(store.as_ref(), "addrA", "ALFA", 20);
        put_balance(store.as_ref(), "addrB", "ALFA", 10);

        let info = supply_info(store.as_ref(), "ALFA").unwrap().unwrap();
        assert_eq!(info.total, 35);
        assert_eq!(info.remaining, 1000 - 37);

        assert_eq!(balance_sum(store.as_ref(), "ALFA").unwrap(), 30);
        assert!(verify_ticker(store.as_ref(), "ALFA").is_ok());
    }

    #[test]
    fn test_verify_catches_balance_drift() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, None, 0));
        put_supply(
            store.as_ref(),
            "ALFA",
            SupplyState {
                universal_minted: 30,
                legacy_minted: 0,
                burned: 0,
            },
        );
        put_balance(store.as_ref(), "addrA", "ALFA", 29);

        let err = verify_ticker(store.as_ref(), "ALFA").unwrap_err();
        assert!(err.contains("balance sum"));
    }

    #[test]
    fn test_all_tickers() {
        let (store, _temp) = test_store();
        put_deploy(store.as_ref(), deploy_record("ALFA", 1000, None, 0));
        put_deploy(store.as_ref(), deploy_record("BETA", 1000, None, 0));
        let mut tickers = all_tickers(store.as_ref()).unwrap();
        tickers.sort();
        assert_eq!(tickers, vec!["ALFA", "BETA"]);
    }
}
