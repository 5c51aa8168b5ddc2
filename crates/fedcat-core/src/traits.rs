//! Core traits for fedcat abstractions.
//!
//! These traits define the interfaces that storage backends, mapping
//! stores, and result filters must satisfy. The service only ever talks to
//! backends through them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::*;
use crate::query::{NativeQuery, QueryExpression};

// =============================================================================
// BACKEND TRAITS
// =============================================================================

/// One record matched by [`Index::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub local_id: LocalId,
    pub bucket: TermBucket,
}

impl IndexHit {
    pub fn new(local_id: LocalId, bucket: TermBucket) -> Self {
        Self { local_id, bucket }
    }
}

/// Storage engine of one catalog.
///
/// Errors: [`crate::Error::BackendUnavailable`] when the engine cannot be
/// reached (the catalog retries once), [`crate::Error::BackendWrite`] when
/// a write is rejected.
#[async_trait]
pub trait Index: Send + Sync {
    /// Store a bucket and return the id the engine assigned to it.
    async fn put(&self, bucket: TermBucket) -> Result<LocalId>;

    /// Replace the bucket stored under `id`.
    async fn update(&self, id: &LocalId, bucket: TermBucket) -> Result<()>;

    /// Remove a record. Removing an unknown id is not an error.
    async fn delete(&self, id: &LocalId) -> Result<()>;

    /// Evaluate a translated query.
    async fn query(&self, query: &NativeQuery) -> Result<Vec<IndexHit>>;

    /// Load one record by id.
    async fn fetch(&self, id: &LocalId) -> Result<Option<TermBucket>>;
}

/// Translator between [`Metadata`] and one bucket of backend terms.
///
/// Implementations are pure and synchronous.
pub trait Dictionary: Send + Sync {
    /// Name of the bucket this dictionary produces and consumes.
    fn bucket_name(&self) -> &str;

    /// Whether the backend can evaluate free-text nodes.
    fn supports_free_text(&self) -> bool {
        false
    }

    /// Restate metadata as terms. `None` means the shape is not modelled
    /// here and the catalog skips this dictionary for the record.
    fn lookup(&self, metadata: &Metadata) -> Option<TermBucket>;

    /// Restate terms as metadata.
    fn reverse_lookup(&self, bucket: &TermBucket) -> Metadata;

    /// Whether this dictionary can translate `expr`: every node admits the
    /// bucket, and free text appears only if supported.
    fn understands(&self, expr: &QueryExpression) -> bool {
        expr.allows_bucket(self.bucket_name())
            && (!expr.requires_free_text() || self.supports_free_text())
    }

    /// Translate `expr` for the index. Only called when [`understands`]
    /// returned true.
    ///
    /// [`understands`]: Dictionary::understands
    fn translate(&self, expr: &QueryExpression) -> NativeQuery {
        NativeQuery::new(self.bucket_name(), expr.clone())
    }
}

// =============================================================================
// INGEST MAPPER
// =============================================================================

/// Mapping between transaction ids and the records holding them.
///
/// `record` is additive: concurrent calls for the same transaction from
/// different catalogs must all be kept.
#[async_trait]
pub trait IngestMapper: Send + Sync {
    /// Remember that `local_id` in `catalog_id` belongs to `tx`.
    async fn record(&self, tx: &TransactionId, catalog_id: &str, local_id: &LocalId) -> Result<()>;

    /// All refs of `tx`, in recording order. Unknown `tx` yields an empty list.
    async fn lookup(&self, tx: &TransactionId) -> Result<Vec<CatalogRecordRef>>;

    /// Forget every ref of `tx`.
    async fn remove(&self, tx: &TransactionId) -> Result<()>;

    /// Transaction owning a local record, if any.
    async fn transaction_for(&self, catalog_id: &str, local_id: &LocalId)
        -> Result<Option<TransactionId>>;

    /// Whether any ref of `tx` is recorded.
    async fn contains(&self, tx: &TransactionId) -> Result<bool> {
        Ok(!self.lookup(tx).await?.is_empty())
    }

    /// Forget one ref of `tx`.
    async fn remove_ref(&self, tx: &TransactionId, r: &CatalogRecordRef) -> Result<()>;

    /// Forget every ref held by a catalog. Returns the number removed.
    async fn remove_catalog(&self, catalog_id: &str) -> Result<u64>;
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Source of fresh transaction ids.
pub trait TransactionIdFactory: Send + Sync {
    /// A new id, never returned before.
    fn mint(&self) -> TransactionId;

    /// Validate and normalise an id received from a caller.
    fn parse(&self, raw: &str) -> Result<TransactionId>;
}

// =============================================================================
// QUERY FILTERS
// =============================================================================

/// Post-merge step over a query result. Filters run in registration order.
pub trait QueryFilter: Send + Sync {
    /// Name used in configuration and logs.
    fn name(&self) -> &str;

    fn apply(&self, results: Vec<TransactionalMetadata>) -> Vec<TransactionalMetadata>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryExpression as Q;

    struct Plain;

    impl Dictionary for Plain {
        fn bucket_name(&self) -> &str {
            "Products"
        }

        fn lookup(&self, metadata: &Metadata) -> Option<TermBucket> {
            let mut bucket = TermBucket::new("Products");
            for attr in metadata.iter() {
                bucket.add_term(Term::new(attr.name.clone(), attr.values.clone()));
            }
            Some(bucket)
        }

        fn reverse_lookup(&self, bucket: &TermBucket) -> Metadata {
            bucket.to_metadata()
        }
    }

    struct WithFreeText;

    impl Dictionary for WithFreeText {
        fn bucket_name(&self) -> &str {
            "Text"
        }

        fn supports_free_text(&self) -> bool {
            true
        }

        fn lookup(&self, _metadata: &Metadata) -> Option<TermBucket> {
            None
        }

        fn reverse_lookup(&self, bucket: &TermBucket) -> Metadata {
            bucket.to_metadata()
        }
    }

    fn shapes() -> Vec<Q> {
        vec![
            Q::term("a", ["1"]),
            Q::comparison("a", crate::ComparisonOp::Gt, "1"),
            Q::and(vec![Q::term("a", ["1"]), Q::term("b", ["2"])]),
        ]
    }

    #[test]
    fn test_understands_unannotated_shapes() {
        for q in shapes() {
            assert!(Plain.understands(&q), "{q}");
            assert!(Plain.understands(&Q::not(q)));
        }
    }

    #[test]
    fn test_understands_false_for_disjoint_buckets() {
        for q in shapes() {
            let restricted = q.clone().in_buckets(["Granules"]);
            assert!(!Plain.understands(&restricted), "{restricted}");
            assert!(!Plain.understands(&Q::not(restricted.clone())));
            assert!(!Plain.understands(&Q::not(q.clone()).in_buckets(["Granules"])));
        }
    }

    #[test]
    fn test_understands_true_for_matching_bucket() {
        for q in shapes() {
            assert!(Plain.understands(&q.in_buckets(["Granules", "Products"])));
        }
    }

    #[test]
    fn test_free_text_requires_capability() {
        let q = Q::free_text("ocean");
        assert!(!Plain.understands(&q));
        assert!(WithFreeText.understands(&q));
        assert!(!Plain.understands(&Q::and(vec![Q::term("a", ["1"]), q])));
    }

    #[test]
    fn test_default_translate_keeps_expression() {
        let q = Q::term("a", ["1"]);
        let native = Plain.translate(&q);
        assert_eq!(native.bucket, "Products");
        assert_eq!(native.expression, q);
    }
}
