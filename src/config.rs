pub use config::Config;
pub use once_cell::sync::OnceCell;
use std::error::Error;

use crate::constants::{DEFAULT_PAYLOAD_MAX_BYTES, DEFAULT_PROTOCOL_TAG};
use crate::types::{ErrorCode, IndexError};

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities
pub fn load_config() -> Result<Config, Box<dyn Error>> {
    Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// Get db_path from config, with shell expansion
pub fn get_db_path(config: &Config) -> Result<String, Box<dyn Error>> {
    let raw = config
        .get_string("paths.db_path")
        .map_err(|e| format!("Missing paths.db_path in config: {}", e))?;
    Ok(shellexpand::tilde(&raw).into_owned())
}

/// Typed snapshot of the indexer options. Validated once at startup;
/// the same (config, height) pair must always produce the same decisions,
/// so nothing in here is re-read mid-run.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// First block height to index.
    pub start_height: i32,
    /// Oracle deploy-validation strictness (see legacy bridge policy).
    pub require_legacy: bool,
    /// Op tags whose processors are active. Empty means all built-ins.
    pub enabled_ops: Vec<String>,
    /// Node block prefetch queue size.
    pub prefetch_depth: usize,
    /// Reject OP_RETURN payloads larger than this many bytes.
    pub payload_max_bytes: usize,
    /// Fatal if the reorg common ancestor lies deeper than this.
    pub reorg_depth_limit: i32,
    /// Transient-error retry policy: base delay, cap, and attempt budget.
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub retry_max_attempts: u32,
    /// Protocol family tag matched against the payload `p` field.
    pub protocol_tag: String,
    /// Seconds between tip polls when the chain is caught up.
    pub poll_interval_secs: u64,
}

impl IndexerConfig {
    /// Read and validate the `indexer.*` table. Any out-of-range value is a
    /// CONFIG_INVALID fatal; defaults cover every omitted key.
    pub fn from_config(config: &Config) -> Result<IndexerConfig, IndexError> {
        let start_height = config.get_int("indexer.start_height").unwrap_or(0) as i32;
        if start_height < 0 {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                format!("indexer.start_height must be >= 0, got {}", start_height),
            ));
        }

        let require_legacy = config.get_bool("indexer.require_legacy").unwrap_or(false);

        let enabled_ops: Vec<String> = match config.get_array("indexer.enabled_ops") {
            Ok(values) => {
                let mut tags = Vec::new();
                for v in values {
                    let tag = v.into_string().map_err(|e| {
                        IndexError::fatal(
                            ErrorCode::ConfigInvalid,
                            format!("indexer.enabled_ops entries must be strings: {}", e),
                        )
                    })?;
                    tags.push(tag.to_lowercase());
                }
                tags
            }
            Err(_) => Vec::new(),
        };

        let prefetch_depth = config.get_int("indexer.prefetch_depth").unwrap_or(8);
        if prefetch_depth < 1 || prefetch_depth > 1024 {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                format!(
                    "indexer.prefetch_depth must be in [1, 1024], got {}",
                    prefetch_depth
                ),
            ));
        }

        let payload_max_bytes = config
            .get_int("indexer.payload_max_bytes")
            .unwrap_or(DEFAULT_PAYLOAD_MAX_BYTES as i64);
        if payload_max_bytes < 1 {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                format!(
                    "indexer.payload_max_bytes must be >= 1, got {}",
                    payload_max_bytes
                ),
            ));
        }

        let reorg_depth_limit = config.get_int("indexer.reorg_depth_limit").unwrap_or(100) as i32;
        if reorg_depth_limit < 1 {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                format!(
                    "indexer.reorg_depth_limit must be >= 1, got {}",
                    reorg_depth_limit
                ),
            ));
        }

        let retry_backoff_ms = config.get_int("indexer.retry_backoff_ms").unwrap_or(500) as u64;
        let retry_backoff_max_ms = config
            .get_int("indexer.retry_backoff_max_ms")
            .unwrap_or(60_000) as u64;
        if retry_backoff_ms == 0 || retry_backoff_max_ms < retry_backoff_ms {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                format!(
                    "retry backoff must satisfy 0 < base <= max, got base={} max={}",
                    retry_backoff_ms, retry_backoff_max_ms
                ),
            ));
        }

        let retry_max_attempts = config.get_int("indexer.retry_max_attempts").unwrap_or(10) as u32;
        if retry_max_attempts == 0 {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                "indexer.retry_max_attempts must be >= 1",
            ));
        }

        let protocol_tag = config
            .get_string("indexer.protocol_tag")
            .unwrap_or_else(|_| DEFAULT_PROTOCOL_TAG.to_string())
            .to_lowercase();
        if protocol_tag.is_empty() {
            return Err(IndexError::fatal(
                ErrorCode::ConfigInvalid,
                "indexer.protocol_tag must not be empty",
            ));
        }

        let poll_interval_secs = config.get_int("indexer.poll_interval_secs").unwrap_or(5) as u64;

        Ok(IndexerConfig {
            start_height,
            require_legacy,
            enabled_ops,
            prefetch_depth: prefetch_depth as usize,
            payload_max_bytes: payload_max_bytes as usize,
            reorg_depth_limit,
            retry_backoff_ms,
            retry_backoff_max_ms,
            retry_max_attempts,
            protocol_tag,
            poll_interval_secs,
        })
    }

    /// Backoff delay for the given retry attempt (0-based), doubling up to
    /// the configured cap.
    pub fn backoff_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let shift = attempt.min(20);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.retry_backoff_max_ms);
        std::time::Duration::from_millis(ms)
    }

    /// Whether a processor tag is enabled under `enabled_ops`.
    pub fn op_enabled(&self, tag: &str) -> bool {
        self.enabled_ops.is_empty() || self.enabled_ops.iter().any(|t| t == &tag.to_lowercase())
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            start_height: 0,
            require_legacy: false,
            enabled_ops: Vec::new(),
            prefetch_depth: 8,
            payload_max_bytes: DEFAULT_PAYLOAD_MAX_BYTES,
            reorg_depth_limit: 100,
            retry_backoff_ms: 500,
            retry_backoff_max_ms: 60_000,
            retry_max_attempts: 10,
            protocol_tag: DEFAULT_PROTOCOL_TAG.to_string(),
            poll_interval_secs: 5,
        }
    }
}
