//! Model registry: signature/model metadata lookups
//!
//! Aggregation resolves every model id against this registry; an unknown id
//! is fatal for the affected sequence rather than silently skipped.

use crate::model::ModelMetadata;
use std::collections::HashMap;

/// Lookup of signature/model metadata by model accession
pub trait ModelRegistry: Send + Sync {
    /// Resolve one model id; `None` means the registry does not know it
    fn lookup(&self, model_id: &str) -> Option<ModelMetadata>;

    /// Names of the analyses (signature libraries) whose hits this registry
    /// covers; workers read hits per sequence per analysis
    fn analyses(&self) -> Vec<String>;
}

/// Registry backed by an in-memory map, loaded once at startup
#[derive(Debug, Default, Clone)]
pub struct InMemoryModelRegistry {
    models: HashMap<String, ModelMetadata>,
    analyses: Vec<String>,
}

impl InMemoryModelRegistry {
    pub fn new(analyses: Vec<String>) -> Self {
        Self {
            models: HashMap::new(),
            analyses,
        }
    }

    /// Register one model
    pub fn insert(&mut self, model_id: impl Into<String>, metadata: ModelMetadata) {
        self.models.insert(model_id.into(), metadata);
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}

impl ModelRegistry for InMemoryModelRegistry {
    fn lookup(&self, model_id: &str) -> Option<ModelMetadata> {
        self.models.get(model_id).cloned()
    }

    fn analyses(&self) -> Vec<String> {
        self.analyses.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        let mut registry = InMemoryModelRegistry::new(vec!["pfam".to_string()]);
        registry.insert(
            "PF00001",
            ModelMetadata {
                signature_id: "SIG00001".to_string(),
                model_length: 250,
            },
        );

        let metadata = registry.lookup("PF00001");
        assert_eq!(
            metadata.map(|m| m.signature_id),
            Some("SIG00001".to_string())
        );
        assert!(registry.lookup("PF99999").is_none());
        assert_eq!(registry.analyses(), vec!["pfam".to_string()]);
    }
}
