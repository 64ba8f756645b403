/// Indexer Service - main synchronization loop
///
/// Single-block-at-a-time pipeline: poll the node tip, prefetch blocks in
/// order through a bounded queue, run each through the block processor, and
/// commit. A prev_hash mismatch anywhere hands off to the reorg handler.
/// Transient failures retry the same block with exponential backoff until
/// the attempt budget runs out, then escalate to fatal. Shutdown is honored
/// between blocks, never mid-commit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::block_processor::BlockProcessor;
use crate::commit::CommitEngine;
use crate::config::IndexerConfig;
use crate::metrics;
use crate::node_client::{NodeClient, NodeError};
use crate::reorg::ReorgHandler;
use crate::store::{read_indexed_tip, Store};
use crate::telemetry::{should_log_progress, truncate_hex};
use crate::types::{Block, ChainTip, ErrorCode, IndexError};

static PROGRESS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What one pass over the chain state accomplished.
enum SyncRound {
    /// Indexed tip matches the node tip; nothing to do.
    CaughtUp,
    /// At least one block was committed.
    Progressed,
    /// A reorg was detected and rolled back; resume forward from the
    /// ancestor.
    ReorgHandled,
}

struct SyncFailure {
    height: i32,
    error: IndexError,
}

pub struct IndexerService {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn Store>,
    processor: Arc<BlockProcessor>,
    commit: Arc<CommitEngine>,
    reorg: Arc<ReorgHandler>,
    config: IndexerConfig,
    shutdown: Arc<AtomicBool>,
}

impl IndexerService {
    pub fn new(
        node: Arc<dyn NodeClient>,
        store: Arc<dyn Store>,
        processor: Arc<BlockProcessor>,
        commit: Arc<CommitEngine>,
        reorg: Arc<ReorgHandler>,
        config: IndexerConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        IndexerService {
            node,
            store,
            processor,
            commit,
            reorg,
            config,
            shutdown,
        }
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run until shutdown or a fatal error.
    pub async fn run(&self) -> Result<(), IndexError> {
        println!("\n╔════════════════════════════════════════════════════╗");
        println!("║              TOKENBLOX INDEXER SERVICE             ║");
        println!("╚════════════════════════════════════════════════════╝");
        println!("  Start height: {}", self.config.start_height);
        println!("  Prefetch depth: {}", self.config.prefetch_depth);
        println!("  Require legacy: {}\n", self.config.require_legacy);

        // Per-height retry accounting; resets whenever a different height
        // fails or any block commits.
        let mut retry_height: i32 = -1;
        let mut retry_attempts: u32 = 0;

        loop {
            if self.shutting_down() {
                println!("  🛑 Shutdown requested, exiting between blocks");
                return Ok(());
            }

            match self.sync_round().await {
                Ok(SyncRound::CaughtUp) => {
                    retry_attempts = 0;
                    self.sleep_with_shutdown(Duration::from_secs(
                        self.config.poll_interval_secs,
                    ))
                    .await;
                }
                Ok(SyncRound::Progressed) | Ok(SyncRound::ReorgHandled) => {
                    retry_attempts = 0;
                }
                Err(SyncFailure { height, error }) => match error {
                    IndexError::Transient { code, message } => {
                        if height == retry_height {
                            retry_attempts += 1;
                        } else {
                            retry_height = height;
                            retry_attempts = 1;
                        }
                        metrics::TRANSIENT_RETRIES
                            .with_label_values(&[code.as_str()])
                            .inc();
                        if retry_attempts > self.config.retry_max_attempts {
                            return Err(IndexError::fatal(
                                code,
                                format!(
                                    "height {} still failing after {} attempts: {}",
                                    height, retry_attempts, message
                                ),
                            ));
                        }
                        let delay = self.config.backoff_for_attempt(retry_attempts - 1);
                        tracing::warn!(
                            height = height,
                            code = %code,
                            attempt = retry_attempts,
                            delay_ms = delay.as_millis() as u64,
                            message = %message,
                            "transient failure, backing off"
                        );
                        self.sleep_with_shutdown(delay).await;
                    }
                    fatal => {
                        tracing::error!(error = %fatal, "fatal indexer error");
                        return Err(fatal);
                    }
                },
            }
        }
    }

    /// One pass: poll the tip, then either verify we are caught up, handle
    /// a reorg, or pull blocks forward until the tip or a failure.
    async fn sync_round(&self) -> Result<SyncRound, SyncFailure> {
        let indexed = self.indexed_tip().map_err(|e| SyncFailure {
            height: self.config.start_height,
            error: e,
        })?;
        let probe_height = indexed
            .as_ref()
            .map(|t| t.height + 1)
            .unwrap_or(self.config.start_height);

        let node = Arc::clone(&self.node);
        let node_tip = blocking(move || node.chain_tip())
            .await
            .map_err(|e| SyncFailure {
                height: probe_height,
                error: IndexError::transient(ErrorCode::NodeUnavailable, e.message),
            })?;
        metrics::NODE_TIP_HEIGHT.set(node_tip.height as i64);

        if let Some(ref tip) = indexed {
            if tip.height >= node_tip.height {
                // Caught up by height; make sure our tip is still the
                // node's block at that height.
                let node = Arc::clone(&self.node);
                let height = tip.height;
                let theirs = blocking(move || node.block_hash_at(height))
                    .await
                    .map_err(|e| SyncFailure {
                        height,
                        error: IndexError::transient(ErrorCode::NodeUnavailable, e.message),
                    })?;
                if let Some(their_hash) = theirs {
                    if their_hash != tip.hash {
                        self.run_reorg(tip.clone()).await.map_err(|error| {
                            SyncFailure {
                                height: tip.height,
                                error,
                            }
                        })?;
                        return Ok(SyncRound::ReorgHandled);
                    }
                }
                return Ok(SyncRound::CaughtUp);
            }
        }

        self.catch_up(indexed, node_tip).await
    }

    /// Pull blocks from the prefetch queue and commit them in order.
    async fn catch_up(
        &self,
        mut indexed: Option<ChainTip>,
        node_tip: ChainTip,
    ) -> Result<SyncRound, SyncFailure> {
        let from = indexed
            .as_ref()
            .map(|t| t.height + 1)
            .unwrap_or(self.config.start_height);
        let mut rx = self.spawn_prefetcher(from, node_tip.height);
        let mut progressed = false;

        while let Some(fetched) = rx.recv().await {
            if self.shutting_down() {
                return Ok(SyncRound::Progressed);
            }

            let block = match fetched {
                Ok(block) => block,
                Err(e) => {
                    let height = indexed.as_ref().map(|t| t.height + 1).unwrap_or(from);
                    return Err(SyncFailure {
                        height,
                        error: IndexError::transient(ErrorCode::NodeUnavailable, e.message),
                    });
                }
            };

            // Fork check against the indexed tip. The first indexed block
            // has a virtual ancestor and skips it.
            if let Some(ref tip) = indexed {
                if block.prev_hash != tip.hash {
                    tracing::warn!(
                        height = block.height,
                        prev = %truncate_hex(&block.prev_hash, 16),
                        tip = %truncate_hex(&tip.hash, 16),
                        "prev_hash mismatch, entering reorg handling"
                    );
                    self.run_reorg(tip.clone()).await.map_err(|error| {
                        SyncFailure {
                            height: tip.height,
                            error,
                        }
                    })?;
                    return Ok(SyncRound::ReorgHandled);
                }
            }

            let committed = ChainTip {
                height: block.height,
                hash: block.hash.clone(),
            };
            self.process_and_commit(block).await.map_err(|error| {
                SyncFailure {
                    height: committed.height,
                    error,
                }
            })?;
            progressed = true;

            if should_log_progress(&PROGRESS_COUNTER, 1000) {
                println!(
                    "  📦 Indexed height {} / node tip {}",
                    committed.height, node_tip.height
                );
            }
            indexed = Some(committed);
        }

        if progressed {
            Ok(SyncRound::Progressed)
        } else {
            Ok(SyncRound::CaughtUp)
        }
    }

    /// Decode, validate and commit one block off the async loop.
    async fn process_and_commit(&self, block: Block) -> Result<(), IndexError> {
        let processor = Arc::clone(&self.processor);
        let commit = Arc::clone(&self.commit);
        blocking(move || {
            let plan = processor.process_block(&block)?;
            commit.commit_block(plan)?;
            Ok(())
        })
        .await
    }

    async fn run_reorg(&self, tip: ChainTip) -> Result<(), IndexError> {
        let reorg = Arc::clone(&self.reorg);
        blocking(move || reorg.handle_reorg(&tip).map(|_| ())).await
    }

    fn indexed_tip(&self) -> Result<Option<ChainTip>, IndexError> {
        read_indexed_tip(self.store.as_ref())
            .map_err(|e| IndexError::transient(ErrorCode::StoreConflict, e.to_string()))
    }

    /// Fetch blocks [from, to] in order into a bounded queue. The fetcher
    /// stops at the first failure; the consumer decides how to retry.
    fn spawn_prefetcher(
        &self,
        from: i32,
        to: i32,
    ) -> mpsc::Receiver<Result<Block, NodeError>> {
        let (tx, rx) = mpsc::channel(self.config.prefetch_depth);
        let node = Arc::clone(&self.node);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::task::spawn_blocking(move || {
            for height in from..=to {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let result = node.block_hash_at(height).and_then(|hash| match hash {
                    Some(hash) => node.block_by_hash(&hash),
                    None => Err(NodeError::new(format!(
                        "node has no block at height {}",
                        height
                    ))),
                });
                let failed = result.is_err();
                if tx.blocking_send(result).is_err() {
                    // Consumer dropped the queue (reorg or shutdown).
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        rx
    }

    async fn sleep_with_shutdown(&self, duration: Duration) {
        let mut remaining = duration;
        let step = Duration::from_millis(250);
        while remaining > Duration::ZERO && !self.shutting_down() {
            let chunk = remaining.min(step);
            tokio::time::sleep(chunk).await;
            remaining = remaining.saturating_sub(chunk);
        }
    }
}

/// spawn_blocking with the join error folded into a transient failure.
async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static + From<NodeError>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_error) => Err(E::from(NodeError::new(format!(
            "blocking task failed: {}",
            join_error
        )))),
    }
}

impl From<NodeError> for IndexError {
    fn from(e: NodeError) -> Self {
        IndexError::transient(ErrorCode::NodeUnavailable, e.message)
    }
}
