use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;

use tokenblox::block_processor::BlockProcessor;
use tokenblox::commit::CommitEngine;
use tokenblox::config::{get_db_path, get_global_config, init_global_config, IndexerConfig};
use tokenblox::indexer::IndexerService;
use tokenblox::legacy::{HttpLegacyOracle, LegacyBridge, LegacyOracle, NullLegacyOracle};
use tokenblox::metrics;
use tokenblox::node_client::{NodeClient, RpcNodeClient};
use tokenblox::registry::build_registry;
use tokenblox::reorg::ReorgHandler;
use tokenblox::store::{open_db, RocksDbStore, Store};
use tokenblox::telemetry::{init_tracing, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_global_config()?;
    let config = get_global_config();

    init_tracing(TelemetryConfig::default())?;
    metrics::register_all();

    let indexer_config = IndexerConfig::from_config(config)?;

    let db_path = get_db_path(config)?;

    // One indexer per database. The lock is held for the process lifetime.
    let lock_path = format!("{}.lock", db_path.trim_end_matches('/'));
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| format!("another indexer instance holds {}", lock_path))?;

    let db = open_db(&db_path)?;
    let store: Arc<dyn Store> = Arc::new(RocksDbStore::new(db));

    let rpc_url = config.get_string("rpc.host")?;
    let rpc_user = config.get_string("rpc.user")?;
    let rpc_pass = config.get_string("rpc.pass")?;
    let rpc_timeout = config.get_int("rpc.timeout_secs").unwrap_or(30) as u64;
    // Blocking HTTP clients are built off the async runtime, same as every
    // place they are later called from.
    let node: Arc<dyn NodeClient> = Arc::new(
        tokio::task::spawn_blocking(move || {
            RpcNodeClient::new(rpc_url, rpc_user, rpc_pass, Duration::from_secs(rpc_timeout))
        })
        .await??,
    );

    let oracle: Arc<dyn LegacyOracle> = match config.get_string("oracle.url") {
        Ok(url) => {
            let timeout = config.get_int("oracle.timeout_secs").unwrap_or(30) as u64;
            Arc::new(
                tokio::task::spawn_blocking(move || {
                    HttpLegacyOracle::new(url, Duration::from_secs(timeout))
                })
                .await??,
            )
        }
        Err(_) => {
            if indexer_config.require_legacy {
                return Err("indexer.require_legacy is set but oracle.url is missing".into());
            }
            Arc::new(NullLegacyOracle)
        }
    };

    let bridge = Arc::new(LegacyBridge::new(
        oracle,
        Arc::clone(&store),
        indexer_config.require_legacy,
    ));
    let registry = Arc::new(build_registry(&indexer_config)?);
    tracing::info!(ops = ?registry.enabled_tags(), "processors registered");

    let processor = Arc::new(BlockProcessor::new(
        Arc::clone(&store),
        registry,
        bridge,
        &indexer_config,
    ));
    let commit = Arc::new(CommitEngine::new(Arc::clone(&store)));
    let reorg = Arc::new(ReorgHandler::new(
        Arc::clone(&store),
        Arc::clone(&node),
        indexer_config.reorg_depth_limit,
        indexer_config.start_height,
    ));

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n  🛑 Ctrl-C received, finishing current block...");
            shutdown_flag.store(true, Ordering::Relaxed);
        }
    });

    let service = IndexerService::new(
        node,
        store,
        processor,
        commit,
        reorg,
        indexer_config,
        shutdown,
    );
    service.run().await?;

    Ok(())
}
