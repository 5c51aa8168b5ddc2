//! Data model shared by every fedcat crate.

use serde::{Deserialize, Serialize};

use crate::error::CatalogFailure;

// =============================================================================
// METADATA
// =============================================================================

/// One attribute of a [`Metadata`] record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

/// Ordered mapping from attribute name to an ordered list of string values.
///
/// Attribute names are unique. Both the attribute order and the value order
/// within an attribute are insertion order.
///
/// # Example
///
/// ```
/// use fedcat_core::Metadata;
///
/// let mut m = Metadata::new();
/// m.add_value("ProductType", "L1B");
/// m.add_value("Keyword", "ocean");
/// m.add_value("Keyword", "salinity");
///
/// assert_eq!(m.get("ProductType"), Some("L1B"));
/// assert_eq!(m.get_all("Keyword"), ["ocean", "salinity"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    attributes: Vec<Attribute>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style single value append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_value(name, value);
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Append a value to an attribute, creating the attribute if needed.
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.attributes[i].values.push(value.into()),
            None => self.attributes.push(Attribute {
                name,
                values: vec![value.into()],
            }),
        }
    }

    /// Append several values to an attribute.
    pub fn add_values<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let idx = match self.position(&name) {
            Some(i) => i,
            None => {
                self.attributes.push(Attribute {
                    name,
                    values: Vec::new(),
                });
                self.attributes.len() - 1
            }
        };
        self.attributes[idx]
            .values
            .extend(values.into_iter().map(Into::into));
    }

    /// Replace all values of an attribute, keeping its position if present.
    pub fn replace<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.position(&name) {
            Some(i) => self.attributes[i].values = values,
            None => self.attributes.push(Attribute { name, values }),
        }
    }

    /// Remove an attribute, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name)
            .map(|i| self.attributes.remove(i).values)
    }

    /// First value of an attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values of an attribute (empty when absent).
    pub fn get_all(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Attribute names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Append every value of `other`, including duplicates.
    pub fn merge(&mut self, other: &Metadata) {
        for attr in &other.attributes {
            self.add_values(attr.name.clone(), attr.values.iter().cloned());
        }
    }

    /// Append values of `other` that this record does not already carry
    /// for the same attribute.
    ///
    /// Merging a record with an identical copy of itself is a no-op, which
    /// is what cross-catalog result union relies on.
    pub fn merge_distinct(&mut self, other: &Metadata) {
        for attr in &other.attributes {
            let fresh: Vec<String> = {
                let existing = self.get_all(&attr.name);
                attr.values
                    .iter()
                    .filter(|v| !existing.contains(v))
                    .cloned()
                    .collect()
            };
            if !fresh.is_empty() || !self.contains_key(&attr.name) {
                self.add_values(attr.name.clone(), fresh);
            }
        }
    }
}

impl FromIterator<(String, Vec<String>)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        let mut m = Metadata::new();
        for (name, values) in iter {
            m.add_values(name, values);
        }
        m
    }
}

// =============================================================================
// TERMS
// =============================================================================

/// A backend-native restatement of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub values: Vec<String>,
}

impl Term {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Named group of terms: the unit a dictionary exchanges with its index.
///
/// The bucket name identifies the semantic domain (e.g. "Products").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermBucket {
    pub name: String,
    pub terms: Vec<Term>,
}

impl TermBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terms: Vec::new(),
        }
    }

    pub fn with_term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn add_term(&mut self, term: Term) {
        self.terms.push(term);
    }

    pub fn term(&self, name: &str) -> Option<&Term> {
        self.terms.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Restate the terms as metadata without any dictionary translation.
    pub fn to_metadata(&self) -> Metadata {
        let mut m = Metadata::new();
        for term in &self.terms {
            m.add_values(term.name.clone(), term.values.iter().cloned());
        }
        m
    }
}

// =============================================================================
// IDENTITIES
// =============================================================================

/// Globally unique identity of one logical ingest.
///
/// Opaque to the service: minted by a [`crate::TransactionIdFactory`] and
/// never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record identity assigned by one backend index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical location of one record: which catalog, and its id there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRecordRef {
    pub catalog_id: String,
    pub local_id: LocalId,
}

impl CatalogRecordRef {
    pub fn new(catalog_id: impl Into<String>, local_id: LocalId) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            local_id,
        }
    }
}

impl std::fmt::Display for CatalogRecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.catalog_id, self.local_id)
    }
}

// =============================================================================
// OPERATION RESULTS
// =============================================================================

/// A query result: logical identity plus the merged metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionalMetadata {
    pub transaction_id: TransactionId,
    pub metadata: Metadata,
    /// Records the metadata was assembled from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<CatalogRecordRef>,
}

impl TransactionalMetadata {
    pub fn new(transaction_id: TransactionId, metadata: Metadata) -> Self {
        Self {
            transaction_id,
            metadata,
            refs: Vec::new(),
        }
    }
}

/// Outcome of an ingest or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub transaction_id: TransactionId,
    /// Records written (or rewritten) under the transaction.
    pub refs: Vec<CatalogRecordRef>,
    /// Catalogs that failed while the operation as a whole succeeded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CatalogFailure>,
}

impl IngestReceipt {
    /// True when at least one catalog failed.
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Catalog ids that hold at least one record of the transaction.
    pub fn catalog_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for r in &self.refs {
            if !ids.contains(&r.catalog_id.as_str()) {
                ids.push(r.catalog_id.as_str());
            }
        }
        ids
    }
}

/// Records a delete could not remove. Returned, never raised: the caller
/// decides whether to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDeleteFailure {
    pub transaction_id: TransactionId,
    pub remaining_refs: Vec<CatalogRecordRef>,
    pub causes: Vec<CatalogFailure>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub transaction_id: TransactionId,
    pub deleted: Vec<CatalogRecordRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PartialDeleteFailure>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

// =============================================================================
// SERVICE INTROSPECTION
// =============================================================================

/// Read-only view of a catalog for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub id: String,
    /// Bucket names of the catalog's dictionaries, in order.
    pub buckets: Vec<String>,
    pub ingest_allowed: bool,
    pub query_allowed: bool,
}

/// Operations the service exposes to transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Ingest,
    Update,
    Delete,
    Query,
    GetMetadata,
    ListCatalogs,
    ListActions,
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Query => write!(f, "query"),
            Self::GetMetadata => write!(f, "get_metadata"),
            Self::ListCatalogs => write!(f, "list_catalogs"),
            Self::ListActions => write!(f, "list_actions"),
        }
    }
}

// =============================================================================
// PAGING
// =============================================================================

/// Requested page of a query result. Pages are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_num: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(page_num: usize, page_size: usize) -> Self {
        Self {
            page_num,
            page_size,
        }
    }

    pub fn first(page_size: usize) -> Self {
        Self::new(0, page_size)
    }

    pub fn next(&self) -> Self {
        Self::new(self.page_num + 1, self.page_size)
    }

    pub fn offset(&self) -> usize {
        self.page_num.saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(crate::defaults::PAGE_SIZE)
    }
}

/// One page of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub request: PageRequest,
    pub total_hits: usize,
    pub results: Vec<TransactionalMetadata>,
}

impl Page {
    /// Slice a full result list into the requested page.
    pub fn from_results(request: PageRequest, results: Vec<TransactionalMetadata>) -> Self {
        let total_hits = results.len();
        let results = results
            .into_iter()
            .skip(request.offset())
            .take(request.page_size)
            .collect();
        Self {
            request,
            total_hits,
            results,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.request.page_size == 0 {
            return 0;
        }
        self.total_hits.div_ceil(self.request.page_size)
    }

    pub fn is_last(&self) -> bool {
        self.request.page_num + 1 >= self.total_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_preserves_attribute_and_value_order() {
        let mut m = Metadata::new();
        m.add_value("b", "1");
        m.add_value("a", "2");
        m.add_value("b", "3");

        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(m.get_all("b"), ["1", "3"]);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_metadata_get_missing() {
        let m = Metadata::new();
        assert_eq!(m.get("nope"), None);
        assert!(m.get_all("nope").is_empty());
        assert!(m.is_empty());
    }

    #[test]
    fn test_metadata_replace_keeps_position() {
        let mut m = Metadata::new().with("a", "1").with("b", "2");
        m.replace("a", ["x", "y"]);
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(m.get_all("a"), ["x", "y"]);
    }

    #[test]
    fn test_metadata_remove() {
        let mut m = Metadata::new().with("a", "1").with("b", "2");
        assert_eq!(m.remove("a"), Some(vec!["1".to_string()]));
        assert!(!m.contains_key("a"));
        assert_eq!(m.remove("a"), None);
    }

    #[test]
    fn test_merge_keeps_duplicates() {
        let mut m = Metadata::new().with("a", "1");
        m.merge(&Metadata::new().with("a", "1"));
        assert_eq!(m.get_all("a"), ["1", "1"]);
    }

    #[test]
    fn test_merge_distinct_of_identical_copy_is_noop() {
        let original = Metadata::new().with("a", "1").with("a", "2").with("b", "3");
        let mut merged = original.clone();
        merged.merge_distinct(&original);
        assert_eq!(merged, original);
    }

    #[test]
    fn test_merge_distinct_adds_new_values_and_attributes() {
        let mut m = Metadata::new().with("a", "1");
        m.merge_distinct(&Metadata::new().with("a", "1").with("a", "2").with("c", "9"));
        assert_eq!(m.get_all("a"), ["1", "2"]);
        assert_eq!(m.get_all("c"), ["9"]);
    }

    #[test]
    fn test_metadata_serializes_as_attribute_list() {
        let m = Metadata::new().with("k", "v");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::json!([{"name": "k", "values": ["v"]}]));
        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_term_bucket_to_metadata() {
        let bucket = TermBucket::new("Products")
            .with_term(Term::new("name", ["a"]))
            .with_term(Term::new("tags", ["x", "y"]));
        let m = bucket.to_metadata();
        assert_eq!(m.get("name"), Some("a"));
        assert_eq!(m.get_all("tags"), ["x", "y"]);
        assert_eq!(bucket.term("tags").map(|t| t.values.len()), Some(2));
    }

    #[test]
    fn test_receipt_catalog_ids_are_distinct() {
        let receipt = IngestReceipt {
            transaction_id: TransactionId::new("t"),
            refs: vec![
                CatalogRecordRef::new("a", LocalId::new("1")),
                CatalogRecordRef::new("a", LocalId::new("2")),
                CatalogRecordRef::new("b", LocalId::new("1")),
            ],
            warnings: vec![],
        };
        assert_eq!(receipt.catalog_ids(), vec!["a", "b"]);
        assert!(!receipt.is_partial());
    }

    #[test]
    fn test_page_from_results() {
        let results: Vec<_> = (0..5)
            .map(|i| TransactionalMetadata::new(TransactionId::new(i.to_string()), Metadata::new()))
            .collect();
        let page = Page::from_results(PageRequest::new(1, 2), results);
        assert_eq!(page.total_hits, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].transaction_id.as_str(), "2");
        assert!(!page.is_last());
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let results = vec![TransactionalMetadata::new(
            TransactionId::new("only"),
            Metadata::new(),
        )];
        let page = Page::from_results(PageRequest::new(3, 10), results);
        assert!(page.results.is_empty());
        assert_eq!(page.total_hits, 1);
    }

    #[test]
    fn test_service_action_display() {
        assert_eq!(ServiceAction::GetMetadata.to_string(), "get_metadata");
        let json = serde_json::to_value(ServiceAction::ListCatalogs).unwrap();
        assert_eq!(json, "list_catalogs");
    }
}
