//! Dictionary mapping metadata attributes one-to-one onto terms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fedcat_core::{Dictionary, Metadata, NativeQuery, QueryExpression, Term, TermBucket};

/// Configuration of an [`AttributeDictionary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeDictionaryConfig {
    /// Bucket name the dictionary serves.
    pub bucket: String,
    /// Metadata attributes carried into the bucket. Empty means all.
    pub attributes: Vec<String>,
    /// Attributes a record must carry for the dictionary to model it.
    pub required: Vec<String>,
    /// Metadata attribute name to backend term name.
    pub renames: BTreeMap<String, String>,
    /// Whether the backend evaluates free-text nodes.
    pub free_text: bool,
}

/// [`Dictionary`] that copies selected attributes into terms, optionally
/// renaming them into the backend's vocabulary.
#[derive(Debug, Clone)]
pub struct AttributeDictionary {
    config: AttributeDictionaryConfig,
    reverse: BTreeMap<String, String>,
}

impl AttributeDictionary {
    pub fn new(config: AttributeDictionaryConfig) -> Self {
        let reverse = config
            .renames
            .iter()
            .map(|(attr, term)| (term.clone(), attr.clone()))
            .collect();
        Self { config, reverse }
    }

    /// Dictionary carrying every attribute into `bucket`.
    pub fn all(bucket: impl Into<String>) -> Self {
        Self::new(AttributeDictionaryConfig {
            bucket: bucket.into(),
            ..Default::default()
        })
    }

    /// Dictionary carrying only the named attributes into `bucket`.
    pub fn only<I, S>(bucket: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(AttributeDictionaryConfig {
            bucket: bucket.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            ..Default::default()
        })
    }

    pub fn with_required<I, S>(mut self, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.required = required.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rename(mut self, attribute: impl Into<String>, term: impl Into<String>) -> Self {
        let (attribute, term) = (attribute.into(), term.into());
        self.reverse.insert(term.clone(), attribute.clone());
        self.config.renames.insert(attribute, term);
        self
    }

    pub fn with_free_text(mut self, enabled: bool) -> Self {
        self.config.free_text = enabled;
        self
    }

    fn term_name(&self, attribute: &str) -> String {
        self.config
            .renames
            .get(attribute)
            .cloned()
            .unwrap_or_else(|| attribute.to_string())
    }

    fn attribute_name(&self, term: &str) -> String {
        self.reverse
            .get(term)
            .cloned()
            .unwrap_or_else(|| term.to_string())
    }

    fn carries(&self, attribute: &str) -> bool {
        self.config.attributes.is_empty() || self.config.attributes.iter().any(|a| a == attribute)
    }
}

impl Dictionary for AttributeDictionary {
    fn bucket_name(&self) -> &str {
        &self.config.bucket
    }

    fn supports_free_text(&self) -> bool {
        self.config.free_text
    }

    fn lookup(&self, metadata: &Metadata) -> Option<TermBucket> {
        if !self.config.required.iter().all(|r| metadata.contains_key(r)) {
            return None;
        }
        let mut bucket = TermBucket::new(self.config.bucket.clone());
        for attr in metadata.iter().filter(|a| self.carries(&a.name)) {
            bucket.add_term(Term::new(self.term_name(&attr.name), attr.values.clone()));
        }
        (!bucket.is_empty()).then_some(bucket)
    }

    fn reverse_lookup(&self, bucket: &TermBucket) -> Metadata {
        bucket
            .terms
            .iter()
            .map(|t| (self.attribute_name(&t.name), t.values.clone()))
            .collect()
    }

    fn translate(&self, expr: &QueryExpression) -> NativeQuery {
        NativeQuery::new(
            self.config.bucket.clone(),
            expr.map_names(&|name: &str| self.term_name(name)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedcat_core::QueryExpression as Q;

    fn record() -> Metadata {
        Metadata::new()
            .with("ProductName", "granule-1")
            .with("ProductType", "L1B")
            .with("Keyword", "ocean")
            .with("Keyword", "salinity")
    }

    #[test]
    fn test_lookup_carries_selected_attributes() {
        let dict = AttributeDictionary::only("Products", ["ProductType", "Keyword"]);
        let bucket = dict.lookup(&record()).unwrap();
        assert_eq!(bucket.name, "Products");
        assert_eq!(bucket.terms.len(), 2);
        assert_eq!(bucket.term("Keyword").unwrap().values, ["ocean", "salinity"]);
    }

    #[test]
    fn test_lookup_none_when_nothing_modelled() {
        let dict = AttributeDictionary::only("Products", ["Missing"]);
        assert!(dict.lookup(&record()).is_none());
    }

    #[test]
    fn test_lookup_none_when_required_missing() {
        let dict = AttributeDictionary::all("Products").with_required(["Checksum"]);
        assert!(dict.lookup(&record()).is_none());
    }

    #[test]
    fn test_renames_round_trip() {
        let dict = AttributeDictionary::all("Products").with_rename("ProductType", "type");
        let bucket = dict.lookup(&record()).unwrap();
        assert!(bucket.term("type").is_some());
        assert_eq!(dict.reverse_lookup(&bucket), record());
    }

    #[test]
    fn test_translate_renames_attributes() {
        let dict = AttributeDictionary::all("Products").with_rename("ProductType", "type");
        let native = dict.translate(&Q::term("ProductType", ["L1B"]));
        assert_eq!(native.bucket, "Products");
        assert_eq!(native.expression.attribute_names(), vec!["type"]);
    }

    #[test]
    fn test_free_text_capability() {
        let q = Q::free_text("ocean");
        assert!(!AttributeDictionary::all("Products").understands(&q));
        assert!(AttributeDictionary::all("Products")
            .with_free_text(true)
            .understands(&q));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: AttributeDictionaryConfig =
            serde_yaml::from_str("bucket: Products\nattributes: [ProductType]\n").unwrap();
        assert_eq!(config.bucket, "Products");
        assert!(config.renames.is_empty());
        assert!(!config.free_text);
    }
}
