/// OPI Registry & Router
///
/// Static map from op-tag to processor handle, populated once at startup.
/// Duplicate tags fail startup; unknown tags at routing time are first-class
/// invalid operations (UNKNOWN_OP), never panics. Lookup is case-insensitive
/// on the tag.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::IndexerConfig;
use crate::processors::{
    DeployProcessor, MintProcessor, NoReturnProcessor, OpProcessor, TransferProcessor,
};
use crate::types::{ErrorCode, IndexError};

#[derive(Default)]
pub struct OpiRegistry {
    processors: HashMap<String, Arc<dyn OpProcessor>>,
}

impl OpiRegistry {
    pub fn new() -> Self {
        OpiRegistry::default()
    }

    /// One-time registration. A duplicate tag is a programming or
    /// configuration error and must stop startup.
    pub fn register(&mut self, processor: Arc<dyn OpProcessor>) -> Result<(), IndexError> {
        let tag = processor.op_tag().to_lowercase();
        if self.processors.contains_key(&tag) {
            return Err(IndexError::fatal(
                ErrorCode::DuplicateProcessorRegistration,
                format!("processor already registered for op tag '{}'", tag),
            ));
        }
        self.processors.insert(tag, processor);
        Ok(())
    }

    /// Route an op-tag to its processor. The router knows nothing about
    /// protocol semantics; all state interaction happens in processors.
    pub fn route(&self, op_tag: &str) -> Option<&Arc<dyn OpProcessor>> {
        self.processors.get(&op_tag.to_lowercase())
    }

    /// Enabled tags, sorted for stable logging.
    pub fn enabled_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.processors.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// Register the built-in processors, honoring `enabled_ops`.
pub fn build_registry(config: &IndexerConfig) -> Result<OpiRegistry, IndexError> {
    let mut registry = OpiRegistry::new();

    let builtins: Vec<Arc<dyn OpProcessor>> = vec![
        Arc::new(DeployProcessor),
        Arc::new(MintProcessor),
        Arc::new(TransferProcessor),
        Arc::new(NoReturnProcessor),
    ];

    for processor in builtins {
        if config.op_enabled(processor.op_tag()) {
            registry.register(processor)?;
        }
    }

    if registry.is_empty() {
        return Err(IndexError::fatal(
            ErrorCode::ConfigInvalid,
            "enabled_ops leaves no processor active",
        ));
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = build_registry(&IndexerConfig::default()).unwrap();
        assert_eq!(
            registry.enabled_tags(),
            vec!["deploy", "mint", "no_return", "transfer"]
        );
        assert!(registry.route("mint").is_some());
        assert!(registry.route("burn").is_none());
    }

    #[test]
    fn test_route_case_insensitive() {
        let registry = build_registry(&IndexerConfig::default()).unwrap();
        assert!(registry.route("MINT").is_some());
        assert!(registry.route("Deploy").is_some());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = OpiRegistry::new();
        registry.register(Arc::new(MintProcessor)).unwrap();
        let err = registry.register(Arc::new(MintProcessor)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateProcessorRegistration);
    }

    #[test]
    fn test_enabled_ops_restricts() {
        let config = IndexerConfig {
            enabled_ops: vec!["deploy".into(), "mint".into()],
            ..Default::default()
        };
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.enabled_tags(), vec!["deploy", "mint"]);
        assert!(registry.route("transfer").is_none());
    }

    #[test]
    fn test_empty_registry_is_config_error() {
        let config = IndexerConfig {
            enabled_ops: vec!["nonexistent".into()],
            ..Default::default()
        };
        let err = build_registry(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }
}
