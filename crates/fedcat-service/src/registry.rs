//! Backend registry mapping configured kinds to constructors.

use std::collections::HashMap;
use std::sync::Arc;

use serde_yaml::Value as YamlValue;

use fedcat_core::{defaults, Dictionary, Error, Index, Result};

use crate::backends::{AttributeDictionary, AttributeDictionaryConfig, MemoryIndex};

/// Builds an index from its configuration parameters.
pub type IndexConstructor = Arc<dyn Fn(&YamlValue) -> Result<Arc<dyn Index>> + Send + Sync>;

/// Builds a dictionary from its configuration parameters.
pub type DictionaryConstructor =
    Arc<dyn Fn(&YamlValue) -> Result<Arc<dyn Dictionary>> + Send + Sync>;

/// Registry resolving backend kind names from configuration.
#[derive(Clone)]
pub struct BackendRegistry {
    indexes: HashMap<String, IndexConstructor>,
    dictionaries: HashMap<String, DictionaryConstructor>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            indexes: HashMap::new(),
            dictionaries: HashMap::new(),
        }
    }

    /// Registry with the built-in memory index and attribute dictionary.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_index(defaults::MEMORY_INDEX_KIND, |_| {
            Ok(Arc::new(MemoryIndex::new()) as Arc<dyn Index>)
        });
        registry.register_dictionary(defaults::ATTRIBUTE_DICTIONARY_KIND, |params| {
            let config: AttributeDictionaryConfig = if params.is_null() {
                AttributeDictionaryConfig::default()
            } else {
                serde_yaml::from_value(params.clone())
                    .map_err(|e| Error::Config(format!("attribute dictionary: {e}")))?
            };
            if config.bucket.is_empty() {
                return Err(Error::Config(
                    "attribute dictionary requires a bucket".to_string(),
                ));
            }
            Ok(Arc::new(AttributeDictionary::new(config)) as Arc<dyn Dictionary>)
        });
        registry
    }

    /// Register an index constructor. Replaces any existing one for `kind`.
    pub fn register_index<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&YamlValue) -> Result<Arc<dyn Index>> + Send + Sync + 'static,
    {
        self.indexes.insert(kind.into(), Arc::new(constructor));
    }

    /// Register a dictionary constructor. Replaces any existing one for `kind`.
    pub fn register_dictionary<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&YamlValue) -> Result<Arc<dyn Dictionary>> + Send + Sync + 'static,
    {
        self.dictionaries.insert(kind.into(), Arc::new(constructor));
    }

    pub fn build_index(&self, kind: &str, params: &YamlValue) -> Result<Arc<dyn Index>> {
        let constructor = self
            .indexes
            .get(kind)
            .ok_or_else(|| Error::Config(format!("No index registered for kind: {kind}")))?;
        constructor(params)
    }

    pub fn build_dictionary(&self, kind: &str, params: &YamlValue) -> Result<Arc<dyn Dictionary>> {
        let constructor = self
            .dictionaries
            .get(kind)
            .ok_or_else(|| Error::Config(format!("No dictionary registered for kind: {kind}")))?;
        constructor(params)
    }

    pub fn has_index(&self, kind: &str) -> bool {
        self.indexes.contains_key(kind)
    }

    pub fn has_dictionary(&self, kind: &str) -> bool {
        self.dictionaries.contains_key(kind)
    }

    /// Registered index kinds, sorted.
    pub fn index_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.indexes.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered dictionary kinds, sorted.
    pub fn dictionary_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.dictionaries.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
