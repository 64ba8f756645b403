pub mod address;
pub mod block_processor;
pub mod commit;
pub mod config;
pub mod constants;
pub mod indexer;
pub mod intermediate;
pub mod keys;
pub mod legacy;
pub mod metrics;
pub mod node_client;
pub mod payload;
pub mod processors;
pub mod protocol;
pub mod registry;
pub mod reorg;
pub mod store;
pub mod supply;
pub mod telemetry;
pub mod types;


#[cfg(test)]
pub mod testkit;
