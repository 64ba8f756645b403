use clap::Parser;

use tokenblox::config::{get_db_path, load_config};
use tokenblox::store::{open_db_read_only, RocksDbStore};
use tokenblox::supply::{all_tickers, supply_info, verify_ticker};

/// Offline supply validator: recomputes per-ticker balance sums and checks
/// them against the supply rollups, plus the max_supply cap.
#[derive(Parser)]
struct Args {
    /// Validate a single ticker instead of all deployed tickers
    #[arg(long)]
    ticker: Option<String>,
    /// Print per-ticker detail even when valid
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config()?;
    let db_path = get_db_path(&config)?;

    let db = open_db_read_only(&db_path)?;
    let store = RocksDbStore::new(db);

    let tickers = match args.ticker {
        Some(ticker) => vec![ticker.to_uppercase()],
        None => all_tickers(&store)?,
    };

    println!("Validating {} ticker(s)...", tickers.len());
    let mut failures = 0;

    for ticker in &tickers {
        match verify_ticker(&store, ticker) {
            Ok(()) => {
                if args.verbose {
                    if let Some(info) = supply_info(&store, ticker)? {
                        println!(
                            "✅ {}: minted={} legacy={} burned={} remaining={}",
                            ticker,
                            info.universal_minted,
                            info.legacy_minted,
                            info.burned,
                            info.remaining,
                        );
                    }
                }
            }
            Err(e) => {
                failures += 1;
                println!("❌ {}", e);
            }
        }
    }

    if failures > 0 {
        println!("\n{} of {} ticker(s) FAILED validation", failures, tickers.len());
        std::process::exit(1);
    }
    println!("All {} ticker(s) valid", tickers.len());
    Ok(())
}
