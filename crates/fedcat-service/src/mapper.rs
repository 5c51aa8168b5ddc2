//! In-memory ingest mapper.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use fedcat_core::{CatalogRecordRef, IngestMapper, LocalId, Result, TransactionId};

#[derive(Default)]
struct MappingTables {
    forward: HashMap<TransactionId, Vec<CatalogRecordRef>>,
    reverse: HashMap<CatalogRecordRef, TransactionId>,
}

/// Process-local [`IngestMapper`]. Both directions live behind one mutex so
/// they never disagree.
#[derive(Default)]
pub struct MemoryIngestMapper {
    tables: Mutex<MappingTables>,
}

impl MemoryIngestMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions with at least one ref.
    pub async fn transaction_count(&self) -> usize {
        self.tables.lock().await.forward.len()
    }
}

#[async_trait]
impl IngestMapper for MemoryIngestMapper {
    async fn record(&self, tx: &TransactionId, catalog_id: &str, local_id: &LocalId) -> Result<()> {
        let r = CatalogRecordRef::new(catalog_id, local_id.clone());
        let mut tables = self.tables.lock().await;
        let refs = tables.forward.entry(tx.clone()).or_default();
        if !refs.contains(&r) {
            refs.push(r.clone());
        }
        tables.reverse.entry(r).or_insert_with(|| tx.clone());
        trace!(
            subsystem = "mapper",
            component = "memory",
            op = "record",
            transaction_id = %tx,
            catalog_id,
            local_id = %local_id,
            "Recorded mapping"
        );
        Ok(())
    }

    async fn lookup(&self, tx: &TransactionId) -> Result<Vec<CatalogRecordRef>> {
        Ok(self
            .tables
            .lock()
            .await
            .forward
            .get(tx)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, tx: &TransactionId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(refs) = tables.forward.remove(tx) {
            for r in refs {
                if tables.reverse.get(&r) == Some(tx) {
                    tables.reverse.remove(&r);
                }
            }
        }
        Ok(())
    }

    async fn transaction_for(
        &self,
        catalog_id: &str,
        local_id: &LocalId,
    ) -> Result<Option<TransactionId>> {
        let r = CatalogRecordRef::new(catalog_id, local_id.clone());
        Ok(self.tables.lock().await.reverse.get(&r).cloned())
    }

    async fn contains(&self, tx: &TransactionId) -> Result<bool> {
        Ok(self.tables.lock().await.forward.contains_key(tx))
    }

    async fn remove_ref(&self, tx: &TransactionId, r: &CatalogRecordRef) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let now_empty = match tables.forward.get_mut(tx) {
            Some(refs) => {
                refs.retain(|x| x != r);
                refs.is_empty()
            }
            None => false,
        };
        if now_empty {
            tables.forward.remove(tx);
        }
        if tables.reverse.get(r) == Some(tx) {
            tables.reverse.remove(r);
        }
        Ok(())
    }

    async fn remove_catalog(&self, catalog_id: &str) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut removed = 0u64;
        tables.forward.retain(|_, refs| {
            let before = refs.len();
            refs.retain(|r| r.catalog_id != catalog_id);
            removed += (before - refs.len()) as u64;
            !refs.is_empty()
        });
        tables.reverse.retain(|r, _| r.catalog_id != catalog_id);
        Ok(removed)
    }
}
