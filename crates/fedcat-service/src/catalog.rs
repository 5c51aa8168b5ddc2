//! A catalog: one index plus the dictionaries that translate for it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use fedcat_core::{
    defaults, CatalogInfo, Dictionary, Index, LocalId, Metadata, QueryExpression, Result,
    TermBucket,
};

/// Dictionary used by catalogs configured without any: every attribute
/// becomes a term of the default bucket.
struct RawDictionary;

impl Dictionary for RawDictionary {
    fn bucket_name(&self) -> &str {
        defaults::DEFAULT_BUCKET
    }

    fn lookup(&self, metadata: &Metadata) -> Option<TermBucket> {
        let mut bucket = TermBucket::new(defaults::DEFAULT_BUCKET);
        for attr in metadata.iter() {
            bucket.add_term(fedcat_core::Term::new(attr.name.clone(), attr.values.clone()));
        }
        (!bucket.is_empty()).then_some(bucket)
    }

    fn reverse_lookup(&self, bucket: &TermBucket) -> Metadata {
        bucket.to_metadata()
    }
}

/// How a catalog retries calls that fail with a transient error.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::BACKEND_RETRY_ATTEMPTS,
            delay: Duration::from_millis(defaults::BACKEND_RETRY_DELAY_MS),
        }
    }
}

/// One index bound to its ordered dictionaries and permission flags.
///
/// Flags are atomics so they can be toggled while fan-out tasks hold the
/// catalog.
pub struct Catalog {
    id: String,
    index: Arc<dyn Index>,
    dictionaries: Vec<Arc<dyn Dictionary>>,
    ingest_allowed: AtomicBool,
    query_allowed: AtomicBool,
    retry: RetryPolicy,
}

impl Catalog {
    pub fn new(id: impl Into<String>, index: Arc<dyn Index>) -> Self {
        Self {
            id: id.into(),
            index,
            dictionaries: Vec::new(),
            ingest_allowed: AtomicBool::new(true),
            query_allowed: AtomicBool::new(true),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_dictionary(mut self, dictionary: Arc<dyn Dictionary>) -> Self {
        self.dictionaries.push(dictionary);
        self
    }

    pub fn with_dictionaries(mut self, dictionaries: Vec<Arc<dyn Dictionary>>) -> Self {
        self.dictionaries.extend(dictionaries);
        self
    }

    pub fn with_permissions(self, ingest: bool, query: bool) -> Self {
        self.set_permissions(ingest, query);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    fn effective_dictionaries(&self) -> Vec<Arc<dyn Dictionary>> {
        if self.dictionaries.is_empty() {
            vec![Arc::new(RawDictionary)]
        } else {
            self.dictionaries.clone()
        }
    }

    pub fn can_ingest(&self) -> bool {
        self.ingest_allowed.load(Ordering::Acquire)
    }

    pub fn can_query(&self) -> bool {
        self.query_allowed.load(Ordering::Acquire)
    }

    pub fn set_permissions(&self, ingest: bool, query: bool) {
        self.ingest_allowed.store(ingest, Ordering::Release);
        self.query_allowed.store(query, Ordering::Release);
    }

    /// Query allowed and at least one dictionary understands `expr`.
    pub fn eligible_for_query(&self, expr: &QueryExpression) -> bool {
        self.can_query()
            && self
                .effective_dictionaries()
                .iter()
                .any(|d| d.understands(expr))
    }

    /// Buckets produced by every dictionary that models `metadata`, in
    /// dictionary order.
    pub fn term_buckets(&self, metadata: &Metadata) -> Vec<TermBucket> {
        self.effective_dictionaries()
            .iter()
            .filter_map(|d| {
                let mut bucket = d.lookup(metadata)?;
                bucket.name = d.bucket_name().to_string();
                Some(bucket)
            })
            .collect()
    }

    /// Metadata restated from a stored bucket, using the dictionary that
    /// owns the bucket name, or the raw terms when none does.
    pub fn reverse(&self, bucket: &TermBucket) -> Metadata {
        match self
            .effective_dictionaries()
            .iter()
            .find(|d| d.bucket_name() == bucket.name)
        {
            Some(d) => d.reverse_lookup(bucket),
            None => bucket.to_metadata(),
        }
    }

    async fn retrying<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    attempt += 1;
                    warn!(
                        subsystem = "catalog",
                        catalog_id = %self.id,
                        op,
                        attempt,
                        error = %e,
                        "Index unavailable, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                other => return other,
            }
        }
    }

    pub async fn put(&self, bucket: TermBucket) -> Result<LocalId> {
        self.retrying("put", || self.index.put(bucket.clone())).await
    }

    pub async fn update(&self, id: &LocalId, bucket: TermBucket) -> Result<()> {
        self.retrying("update", || self.index.update(id, bucket.clone()))
            .await
    }

    pub async fn delete(&self, id: &LocalId) -> Result<()> {
        self.retrying("delete", || self.index.delete(id)).await
    }

    pub async fn fetch(&self, id: &LocalId) -> Result<Option<TermBucket>> {
        self.retrying("fetch", || self.index.fetch(id)).await
    }

    /// Metadata assembled from several records of this catalog. Missing
    /// records are skipped.
    pub async fn fetch_metadata(&self, ids: &[LocalId]) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        for id in ids {
            if let Some(bucket) = self.fetch(id).await? {
                metadata.merge_distinct(&self.reverse(&bucket));
            }
        }
        Ok(metadata)
    }

    /// Evaluate `expr` through every dictionary that understands it.
    ///
    /// Hits are unioned by local id in first-seen order.
    pub async fn query(&self, expr: &QueryExpression) -> Result<Vec<(LocalId, Metadata)>> {
        let mut results: Vec<(LocalId, Metadata)> = Vec::new();
        for dictionary in self.effective_dictionaries() {
            if !dictionary.understands(expr) {
                continue;
            }
            let native = dictionary.translate(expr);
            trace!(
                subsystem = "catalog",
                catalog_id = %self.id,
                query = %native,
                "Translated query"
            );
            let hits = self.retrying("query", || self.index.query(&native)).await?;
            for hit in hits {
                let metadata = self.reverse(&hit.bucket);
                match results.iter_mut().find(|(id, _)| *id == hit.local_id) {
                    Some((_, existing)) => existing.merge_distinct(&metadata),
                    None => results.push((hit.local_id, metadata)),
                }
            }
        }
        debug!(
            subsystem = "catalog",
            catalog_id = %self.id,
            result_count = results.len(),
            "Catalog query complete"
        );
        Ok(results)
    }

    pub fn info(&self) -> CatalogInfo {
        CatalogInfo {
            id: self.id.clone(),
            buckets: self
                .effective_dictionaries()
                .iter()
                .map(|d| d.bucket_name().to_string())
                .collect(),
            ingest_allowed: self.can_ingest(),
            query_allowed: self.can_query(),
        }
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("id", &self.id)
            .field("dictionaries", &self.dictionaries.len())
            .field("ingest_allowed", &self.can_ingest())
            .field("query_allowed", &self.can_query())
            .finish()
    }
}
