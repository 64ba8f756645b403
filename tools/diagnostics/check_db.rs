use tokenblox::config::{get_db_path, load_config};
use tokenblox::keys;
use tokenblox::store::{
    open_db_read_only, read_indexed_tip, read_log_for_height, read_next_log_id, RocksDbStore,
    StateReader, Store,
};
use tokenblox::types::OpLogEntry;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let db_path = get_db_path(&config)?;

    let db = open_db_read_only(&db_path)?;
    let store = RocksDbStore::new(db);

    println!("=== CHAIN STATE ===");
    let tip = read_indexed_tip(&store)?;
    match &tip {
        Some(tip) => {
            println!("Indexed tip: {} ({})", tip.height, tip.hash);
        }
        None => println!("Indexed tip: NOT SET (fresh database)"),
    }
    println!("Next op_log id: {}", read_next_log_id(&store)?);

    if let Some(tip) = &tip {
        let ops = read_log_for_height(&store, tip.height)?;
        println!("Operations in tip block: {}", ops.len());
    }

    println!("\n=== ROW COUNTS ===");
    for cf in [
        "deploys",
        "supplies",
        "balances",
        "legacy_tokens",
        "processed_blocks",
    ] {
        let count = store.prefix_scan(cf, b"")?.len();
        println!("{}: {}", cf, count);
    }

    println!("\n=== DEPLOYS ===");
    for (key, value) in store.prefix_scan("deploys", b"")? {
        let ticker = String::from_utf8_lossy(&key).into_owned();
        let record: tokenblox::types::DeployRecord = bincode::deserialize(&value)?;
        let supply = store.supply(&ticker).unwrap_or_default();
        println!(
            "{}: max={} lim={:?} dec={} minted={} legacy={} burned={} (deployed at {})",
            ticker,
            record.max_supply,
            record.limit_per_mint,
            record.decimals,
            supply.universal_minted,
            supply.legacy_minted,
            supply.burned,
            record.deploy_height,
        );
    }

    println!("\n=== LAST OP LOG ENTRIES ===");
    let next = read_next_log_id(&store)?;
    let from = next.saturating_sub(11).max(1);
    for id in from..next {
        if let Some(raw) = store.get("op_log", &keys::op_log_key(id))? {
            let entry: OpLogEntry = bincode::deserialize(&raw)?;
            println!(
                "#{} h={} ({},{}) {} {} valid={} {}",
                entry.id,
                entry.block_height,
                entry.tx_index,
                entry.sub_index,
                entry.op,
                entry.ticker.as_deref().unwrap_or("-"),
                entry.valid,
                entry.error_code.as_deref().unwrap_or(""),
            );
        }
    }

    Ok(())
}
