//! Shared helpers for fedcat-service integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fedcat_service::backends::{AttributeDictionary, MemoryIndex};
use fedcat_service::{
    Catalog, Error, Index, IndexHit, LocalId, Metadata, NativeQuery, Result, RetryPolicy,
    TermBucket,
};

/// Memory index with switchable faults.
#[derive(Default)]
pub struct FaultyIndex {
    pub inner: MemoryIndex,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_queries: AtomicBool,
    hang_reads: AtomicBool,
    hang_deletes: AtomicBool,
    put_delay_ms: AtomicU64,
}

impl FaultyIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_puts(&self, enabled: bool) {
        self.fail_puts.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, enabled: bool) {
        self.fail_deletes.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, enabled: bool) {
        self.fail_queries.store(enabled, Ordering::SeqCst);
    }

    /// Make `query` and `fetch` never return.
    pub fn hang_reads(&self, enabled: bool) {
        self.hang_reads.store(enabled, Ordering::SeqCst);
    }

    /// Make `delete` never return.
    pub fn hang_deletes(&self, enabled: bool) {
        self.hang_deletes.store(enabled, Ordering::SeqCst);
    }

    pub fn delay_puts(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Index for FaultyIndex {
    async fn put(&self, bucket: TermBucket) -> Result<LocalId> {
        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::BackendWrite("constraint violation".to_string()));
        }
        self.inner.put(bucket).await
    }

    async fn update(&self, id: &LocalId, bucket: TermBucket) -> Result<()> {
        self.inner.update(id, bucket).await
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        if self.hang_deletes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::BackendWrite("delete rejected".to_string()));
        }
        self.inner.delete(id).await
    }

    async fn query(&self, query: &NativeQuery) -> Result<Vec<IndexHit>> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("connection refused".to_string()));
        }
        self.inner.query(query).await
    }

    async fn fetch(&self, id: &LocalId) -> Result<Option<TermBucket>> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.fetch(id).await
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 1,
        delay: Duration::from_millis(1),
    }
}

/// Catalog serving every attribute under the `Products` bucket.
pub fn products_catalog(id: &str, index: Arc<dyn Index>) -> Catalog {
    Catalog::new(id, index)
        .with_dictionary(Arc::new(AttributeDictionary::all("Products")))
        .with_retry(fast_retry())
}

pub fn granule(name: &str, product_type: &str) -> Metadata {
    Metadata::new()
        .with("ProductName", name)
        .with("ProductType", product_type)
        .with("Keyword", "ocean")
        .with("Keyword", "salinity")
}

pub fn event(name: &str, start: i64, end: i64, priority: f64) -> Metadata {
    Metadata::new()
        .with("ProductName", name)
        .with("ProductType", "EVENT")
        .with("StartDateTime", start.to_string())
        .with("EndDateTime", end.to_string())
        .with("Priority", priority.to_string())
}
