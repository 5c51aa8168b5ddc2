//! Catalog service: fans operations out to catalogs and keeps the ingest
//! mapper consistent with what the backends hold.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use fedcat_core::{
    defaults, CatalogFailure, CatalogInfo, CatalogRecordRef, DeleteReport, Error, IngestMapper,
    IngestReceipt, LocalId, Metadata, Page, PageRequest, PartialDeleteFailure, QueryExpression,
    QueryFilter, Result, ServiceAction, TransactionId, TransactionIdFactory,
    TransactionalMetadata, UuidV7TransactionIdFactory,
};

use crate::catalog::Catalog;
use crate::mapper::MemoryIngestMapper;

// =============================================================================
// POLICY
// =============================================================================

/// Service-wide behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationPolicy {
    /// Abort and compensate an ingest when any catalog fails.
    pub one_catalog_fails_all_fail: bool,
    /// Flatten and collapse query trees before dispatch.
    pub simplify_queries: bool,
    /// Refuse ingest, update and delete.
    pub restrict_ingest: bool,
    /// Refuse query and metadata retrieval.
    pub restrict_query: bool,
    /// Deadline for each catalog branch of a fan-out.
    pub branch_timeout_secs: u64,
}

impl Default for FederationPolicy {
    fn default() -> Self {
        Self {
            one_catalog_fails_all_fail: defaults::ONE_CATALOG_FAILS_ALL_FAIL,
            simplify_queries: defaults::SIMPLIFY_QUERIES,
            restrict_ingest: defaults::RESTRICT_INGEST,
            restrict_query: defaults::RESTRICT_QUERY,
            branch_timeout_secs: defaults::BRANCH_TIMEOUT_SECS,
        }
    }
}

impl FederationPolicy {
    pub fn branch_timeout(&self) -> Duration {
        Duration::from_secs(self.branch_timeout_secs)
    }

    pub fn with_all_fail(mut self, enabled: bool) -> Self {
        self.one_catalog_fails_all_fail = enabled;
        self
    }

    pub fn with_simplify_queries(mut self, enabled: bool) -> Self {
        self.simplify_queries = enabled;
        self
    }

    pub fn with_restrictions(mut self, ingest: bool, query: bool) -> Self {
        self.restrict_ingest = ingest;
        self.restrict_query = query;
        self
    }

    pub fn with_branch_timeout_secs(mut self, secs: u64) -> Self {
        self.branch_timeout_secs = secs;
        self
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

type BranchOutcome<T> = std::result::Result<T, String>;

/// Run `branch` for every catalog in its own task with its own deadline.
///
/// Outcomes come back in catalog order. Errors, timeouts and panics are
/// flattened to a reason string for the catalog.
async fn fan_out<T, F, Fut>(
    catalogs: Vec<Arc<Catalog>>,
    timeout: Duration,
    mut branch: F,
) -> Vec<(String, BranchOutcome<T>)>
where
    F: FnMut(Arc<Catalog>) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let ids: Vec<String> = catalogs.iter().map(|c| c.id().to_string()).collect();
    let handles = catalogs.into_iter().map(|catalog| {
        let work = branch(catalog);
        tokio::spawn(async move { tokio::time::timeout(timeout, work).await })
    });
    let joined = join_all(handles).await;

    ids.into_iter()
        .zip(joined)
        .map(|(id, joined)| {
            let outcome = match joined {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(_)) => Err(Error::Timeout(format!("catalog {id} after {timeout:?}")).to_string()),
                Err(e) => Err(format!("branch task failed: {e}")),
            };
            (id, outcome)
        })
        .collect()
}

/// Marks an ingest abandoned when the caller's future is dropped before the
/// orchestration task reports back.
struct AbandonGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl AbandonGuard {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Release);
        }
    }
}

// =============================================================================
// SERVICE
// =============================================================================

struct Inner {
    catalogs: Vec<Arc<Catalog>>,
    mapper: Arc<dyn IngestMapper>,
    id_factory: Arc<dyn TransactionIdFactory>,
    filters: Vec<Arc<dyn QueryFilter>>,
    policy: FederationPolicy,
    restrict_ingest: AtomicBool,
    restrict_query: AtomicBool,
}

/// Federated catalog service.
///
/// Cheap to clone; clones share catalogs, mapper and permission state.
#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<Inner>,
}

/// Builder for [`CatalogService`].
pub struct CatalogServiceBuilder {
    catalogs: Vec<Catalog>,
    mapper: Option<Arc<dyn IngestMapper>>,
    id_factory: Option<Arc<dyn TransactionIdFactory>>,
    filters: Vec<Arc<dyn QueryFilter>>,
    policy: FederationPolicy,
}

impl Default for CatalogServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogServiceBuilder {
    pub fn new() -> Self {
        Self {
            catalogs: Vec::new(),
            mapper: None,
            id_factory: None,
            filters: Vec::new(),
            policy: FederationPolicy::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalogs.push(catalog);
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn IngestMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_id_factory(mut self, factory: Arc<dyn TransactionIdFactory>) -> Self {
        self.id_factory = Some(factory);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn QueryFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_policy(mut self, policy: FederationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the service. Defaults to an in-memory mapper and UUIDv7
    /// transaction ids.
    pub fn build(self) -> Result<CatalogService> {
        let mut seen: Vec<&str> = Vec::new();
        for catalog in &self.catalogs {
            if seen.contains(&catalog.id()) {
                return Err(Error::Config(format!(
                    "duplicate catalog id: {}",
                    catalog.id()
                )));
            }
            seen.push(catalog.id());
        }

        let policy = self.policy;
        info!(
            subsystem = "service",
            catalog_count = self.catalogs.len(),
            filter_count = self.filters.len(),
            one_catalog_fails_all_fail = policy.one_catalog_fails_all_fail,
            simplify_queries = policy.simplify_queries,
            "Catalog service configured"
        );

        Ok(CatalogService {
            inner: Arc::new(Inner {
                catalogs: self.catalogs.into_iter().map(Arc::new).collect(),
                mapper: self
                    .mapper
                    .unwrap_or_else(|| Arc::new(MemoryIngestMapper::new())),
                id_factory: self
                    .id_factory
                    .unwrap_or_else(|| Arc::new(UuidV7TransactionIdFactory)),
                filters: self.filters,
                restrict_ingest: AtomicBool::new(policy.restrict_ingest),
                restrict_query: AtomicBool::new(policy.restrict_query),
                policy,
            }),
        })
    }
}

impl CatalogService {
    pub fn builder() -> CatalogServiceBuilder {
        CatalogServiceBuilder::new()
    }

    /// Current policy, with the live service restrictions.
    pub fn policy(&self) -> FederationPolicy {
        FederationPolicy {
            restrict_ingest: self.inner.restrict_ingest.load(Ordering::Acquire),
            restrict_query: self.inner.restrict_query.load(Ordering::Acquire),
            ..self.inner.policy.clone()
        }
    }

    pub fn mapper(&self) -> &Arc<dyn IngestMapper> {
        &self.inner.mapper
    }

    pub fn catalog(&self, id: &str) -> Option<&Arc<Catalog>> {
        self.inner.catalog(id)
    }

    pub fn list_catalogs(&self) -> Vec<CatalogInfo> {
        self.inner.catalogs.iter().map(|c| c.info()).collect()
    }

    /// Actions currently permitted by the service restrictions.
    pub fn supported_actions(&self) -> Vec<ServiceAction> {
        let ingest = !self.inner.restrict_ingest.load(Ordering::Acquire);
        let query = !self.inner.restrict_query.load(Ordering::Acquire);
        let mut actions = Vec::new();
        if ingest {
            actions.extend([ServiceAction::Ingest, ServiceAction::Update, ServiceAction::Delete]);
        }
        if query {
            actions.extend([ServiceAction::Query, ServiceAction::GetMetadata]);
        }
        actions.extend([ServiceAction::ListCatalogs, ServiceAction::ListActions]);
        actions
    }

    pub fn set_catalog_permissions(&self, catalog_id: &str, ingest: bool, query: bool) -> Result<()> {
        let catalog = self
            .inner
            .catalog(catalog_id)
            .ok_or_else(|| Error::CatalogNotFound(catalog_id.to_string()))?;
        catalog.set_permissions(ingest, query);
        info!(
            subsystem = "service",
            catalog_id,
            ingest_allowed = ingest,
            query_allowed = query,
            "Catalog permissions changed"
        );
        Ok(())
    }

    pub fn set_service_restrictions(&self, restrict_ingest: bool, restrict_query: bool) {
        self.inner
            .restrict_ingest
            .store(restrict_ingest, Ordering::Release);
        self.inner
            .restrict_query
            .store(restrict_query, Ordering::Release);
        info!(
            subsystem = "service",
            restrict_ingest, restrict_query, "Service restrictions changed"
        );
    }

    // -------------------------------------------------------------------------
    // Ingest
    // -------------------------------------------------------------------------

    /// Ingest `metadata` into every catalog that accepts ingest.
    pub async fn ingest(&self, metadata: Metadata) -> Result<IngestReceipt> {
        self.inner.check_ingest()?;
        let targets: Vec<Arc<Catalog>> = self
            .inner
            .catalogs
            .iter()
            .filter(|c| c.can_ingest())
            .cloned()
            .collect();
        self.run_ingest(targets, metadata).await
    }

    /// Ingest `metadata` into the named catalogs only.
    pub async fn ingest_into(&self, metadata: Metadata, catalog_ids: &[&str]) -> Result<IngestReceipt> {
        self.inner.check_ingest()?;
        let mut targets = Vec::with_capacity(catalog_ids.len());
        for id in catalog_ids {
            let catalog = self
                .inner
                .catalog(id)
                .ok_or_else(|| Error::CatalogNotFound(id.to_string()))?;
            if !catalog.can_ingest() {
                return Err(Error::PermissionDenied(format!(
                    "ingest disabled for catalog {id}"
                )));
            }
            targets.push(catalog.clone());
        }
        self.run_ingest(targets, metadata).await
    }

    async fn run_ingest(&self, targets: Vec<Arc<Catalog>>, metadata: Metadata) -> Result<IngestReceipt> {
        let tx = self.inner.id_factory.mint();
        if targets.is_empty() {
            warn!(
                subsystem = "service",
                op = "ingest",
                transaction_id = %tx,
                "No catalog accepts ingest"
            );
            return Ok(IngestReceipt {
                transaction_id: tx,
                refs: Vec::new(),
                warnings: Vec::new(),
            });
        }

        // Orchestration runs detached so a dropped caller still leaves the
        // backends consistent.
        let abandoned = Arc::new(AtomicBool::new(false));
        let guard = AbandonGuard::new(abandoned.clone());
        let task = tokio::spawn(self.inner.clone().ingest_task(
            targets,
            tx,
            metadata,
            abandoned,
        ));
        let outcome = task
            .await
            .map_err(|e| Error::Internal(format!("ingest task failed: {e}")))?;
        guard.disarm();
        outcome
    }

    /// Rewrite the records of `tx` with `metadata` in every catalog that
    /// holds it.
    pub async fn update(&self, tx: &TransactionId, metadata: Metadata) -> Result<IngestReceipt> {
        self.inner.check_ingest()?;
        let start = Instant::now();
        let refs = self.inner.mapper.lookup(tx).await?;
        if refs.is_empty() {
            return Err(Error::NotFound(format!("transaction {tx}")));
        }

        let mut failures = Vec::new();
        let mut targets: Vec<(Arc<Catalog>, Vec<CatalogRecordRef>)> = Vec::new();
        for (catalog_id, catalog_refs) in group_by_catalog(refs) {
            match self.inner.catalog(&catalog_id) {
                Some(c) if c.can_ingest() => targets.push((c.clone(), catalog_refs)),
                Some(_) => failures.push(CatalogFailure::new(catalog_id, "ingest disabled")),
                None => failures.push(CatalogFailure::new(catalog_id, "catalog not configured")),
            }
        }

        let mut existing: HashMap<String, Vec<CatalogRecordRef>> = targets
            .iter()
            .map(|(c, r)| (c.id().to_string(), r.clone()))
            .collect();
        let catalogs = targets.into_iter().map(|(c, _)| c).collect();
        let results = fan_out(catalogs, self.inner.policy.branch_timeout(), |catalog| {
            let inner = self.inner.clone();
            let tx = tx.clone();
            let metadata = metadata.clone();
            let refs = existing.remove(catalog.id()).unwrap_or_default();
            async move { inner.update_branch(&catalog, &tx, &metadata, refs).await }
        })
        .await;

        let mut written = Vec::new();
        for (catalog_id, outcome) in results {
            match outcome {
                Ok(refs) => written.extend(refs),
                Err(reason) => {
                    warn!(
                        subsystem = "service",
                        op = "update",
                        transaction_id = %tx,
                        catalog_id = %catalog_id,
                        error = %reason,
                        "Catalog update failed"
                    );
                    failures.push(CatalogFailure::new(catalog_id, reason));
                }
            }
        }

        if !failures.is_empty() && self.inner.policy.one_catalog_fails_all_fail {
            error!(
                subsystem = "service",
                op = "update",
                transaction_id = %tx,
                failure_count = failures.len(),
                "Update failed"
            );
            return Err(Error::IngestFailed {
                transaction_id: tx.clone(),
                causes: failures,
            });
        }

        info!(
            subsystem = "service",
            op = "update",
            transaction_id = %tx,
            ref_count = written.len(),
            failure_count = failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Update complete"
        );
        Ok(IngestReceipt {
            transaction_id: tx.clone(),
            refs: written,
            warnings: failures,
        })
    }

    // -------------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------------

    /// Delete every record of `tx` and forget the transaction.
    ///
    /// Records that could not be removed come back in the report; pass the
    /// failure to [`CatalogService::retry_delete`] to try them again.
    pub async fn delete(&self, tx: &TransactionId) -> Result<DeleteReport> {
        self.inner.check_ingest()?;
        let start = Instant::now();
        let refs = self.inner.mapper.lookup(tx).await?;
        let report = self.inner.delete_refs(tx, refs).await;
        self.inner.mapper.remove(tx).await?;

        if report.is_complete() {
            info!(
                subsystem = "service",
                op = "delete",
                transaction_id = %tx,
                ref_count = report.deleted.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Delete complete"
            );
        } else {
            warn!(
                subsystem = "service",
                op = "delete",
                transaction_id = %tx,
                ref_count = report.deleted.len(),
                failure_count = report.failure.as_ref().map_or(0, |f| f.remaining_refs.len()),
                "Delete left records behind"
            );
        }
        Ok(report)
    }

    /// Re-attempt the records a previous delete could not remove.
    pub async fn retry_delete(&self, failure: &PartialDeleteFailure) -> Result<DeleteReport> {
        self.inner.check_ingest()?;
        let report = self
            .inner
            .delete_refs(&failure.transaction_id, failure.remaining_refs.clone())
            .await;
        debug!(
            subsystem = "service",
            op = "retry_delete",
            transaction_id = %failure.transaction_id,
            ref_count = report.deleted.len(),
            complete = report.is_complete(),
            "Delete retried"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Query
    // -------------------------------------------------------------------------

    /// Evaluate `expr` against every eligible catalog and merge by
    /// transaction.
    pub async fn query(&self, expr: &QueryExpression) -> Result<Vec<TransactionalMetadata>> {
        self.inner.check_query()?;
        let targets = self.inner.catalogs.clone();
        self.inner.run_query(expr, targets).await
    }

    /// Like [`CatalogService::query`], limited to the named catalogs.
    pub async fn query_catalogs(
        &self,
        expr: &QueryExpression,
        catalog_ids: &[&str],
    ) -> Result<Vec<TransactionalMetadata>> {
        self.inner.check_query()?;
        let mut targets = Vec::with_capacity(catalog_ids.len());
        for id in catalog_ids {
            let catalog = self
                .inner
                .catalog(id)
                .ok_or_else(|| Error::CatalogNotFound(id.to_string()))?;
            targets.push(catalog.clone());
        }
        self.inner.run_query(expr, targets).await
    }

    /// One page of the filtered query result.
    pub async fn query_page(&self, expr: &QueryExpression, page: PageRequest) -> Result<Page> {
        let results = self.query(expr).await?;
        Ok(Page::from_results(page, results))
    }

    /// Metadata of known transactions, assembled from every mapped record.
    /// Unknown transactions are skipped.
    pub async fn get_metadata(&self, txs: &[TransactionId]) -> Result<Vec<TransactionalMetadata>> {
        self.inner.check_query()?;
        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            let refs = self.inner.mapper.lookup(tx).await?;
            if refs.is_empty() {
                debug!(
                    subsystem = "service",
                    op = "get_metadata",
                    transaction_id = %tx,
                    "Unknown transaction skipped"
                );
                continue;
            }
            results.push(TransactionalMetadata::new(tx.clone(), Metadata::new()));
        }
        self.inner.hydrate(&mut results, &[]).await;
        results.retain(|r| !r.refs.is_empty());
        Ok(results)
    }
}

fn group_by_catalog(refs: Vec<CatalogRecordRef>) -> Vec<(String, Vec<CatalogRecordRef>)> {
    let mut groups: Vec<(String, Vec<CatalogRecordRef>)> = Vec::new();
    for r in refs {
        match groups.iter_mut().find(|(id, _)| *id == r.catalog_id) {
            Some((_, group)) => group.push(r),
            None => groups.push((r.catalog_id.clone(), vec![r])),
        }
    }
    groups
}

impl Inner {
    fn catalog(&self, id: &str) -> Option<&Arc<Catalog>> {
        self.catalogs.iter().find(|c| c.id() == id)
    }

    fn check_ingest(&self) -> Result<()> {
        if self.restrict_ingest.load(Ordering::Acquire) {
            return Err(Error::PermissionDenied("ingest is restricted".into()));
        }
        Ok(())
    }

    fn check_query(&self) -> Result<()> {
        if self.restrict_query.load(Ordering::Acquire) {
            return Err(Error::PermissionDenied("query is restricted".into()));
        }
        Ok(())
    }

    async fn ingest_task(
        self: Arc<Self>,
        targets: Vec<Arc<Catalog>>,
        tx: TransactionId,
        metadata: Metadata,
        abandoned: Arc<AtomicBool>,
    ) -> Result<IngestReceipt> {
        let start = Instant::now();
        let results = fan_out(targets, self.policy.branch_timeout(), |catalog| {
            let inner = self.clone();
            let tx = tx.clone();
            let metadata = metadata.clone();
            async move { inner.ingest_branch(&catalog, &tx, &metadata).await }
        })
        .await;

        let mut refs = Vec::new();
        let mut failures = Vec::new();
        for (catalog_id, outcome) in results {
            match outcome {
                Ok(written) => refs.extend(written),
                Err(reason) => {
                    warn!(
                        subsystem = "service",
                        op = "ingest",
                        transaction_id = %tx,
                        catalog_id = %catalog_id,
                        error = %reason,
                        "Catalog ingest failed"
                    );
                    failures.push(CatalogFailure::new(catalog_id, reason));
                }
            }
        }

        if abandoned.load(Ordering::Acquire) {
            warn!(
                subsystem = "service",
                op = "ingest",
                transaction_id = %tx,
                "Ingest abandoned by caller, compensating"
            );
            self.compensate(&tx, None).await;
            return Err(Error::Internal(format!("ingest {tx} abandoned")));
        }

        if !failures.is_empty() {
            if self.policy.one_catalog_fails_all_fail {
                self.compensate(&tx, None).await;
                error!(
                    subsystem = "service",
                    op = "ingest",
                    transaction_id = %tx,
                    failure_count = failures.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Ingest failed, committed catalogs compensated"
                );
                return Err(Error::IngestFailed {
                    transaction_id: tx,
                    causes: failures,
                });
            }
            let failed: Vec<&str> = failures.iter().map(|f| f.catalog_id.as_str()).collect();
            self.compensate(&tx, Some(failed.as_slice())).await;
        }

        if refs.is_empty() && failures.is_empty() {
            warn!(
                subsystem = "service",
                op = "ingest",
                transaction_id = %tx,
                "No dictionary models the metadata"
            );
        }
        info!(
            subsystem = "service",
            op = "ingest",
            transaction_id = %tx,
            ref_count = refs.len(),
            failure_count = failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingest complete"
        );
        Ok(IngestReceipt {
            transaction_id: tx,
            refs,
            warnings: failures,
        })
    }

    /// Put every bucket the catalog's dictionaries produce and record each
    /// write before the next one.
    async fn ingest_branch(
        &self,
        catalog: &Catalog,
        tx: &TransactionId,
        metadata: &Metadata,
    ) -> Result<Vec<CatalogRecordRef>> {
        let buckets = catalog.term_buckets(metadata);
        if buckets.is_empty() {
            debug!(
                subsystem = "service",
                op = "ingest",
                transaction_id = %tx,
                catalog_id = catalog.id(),
                "Catalog does not model the metadata"
            );
        }
        let mut refs = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let local_id = catalog.put(bucket).await?;
            self.record_or_undo(catalog, tx, &local_id).await?;
            refs.push(CatalogRecordRef::new(catalog.id(), local_id));
        }
        Ok(refs)
    }

    /// Record a fresh write; if the mapper refuses, remove the write so the
    /// backend holds nothing unmapped.
    async fn record_or_undo(&self, catalog: &Catalog, tx: &TransactionId, local_id: &LocalId) -> Result<()> {
        if let Err(e) = self.mapper.record(tx, catalog.id(), local_id).await {
            if let Err(undo) = catalog.delete(local_id).await {
                error!(
                    subsystem = "service",
                    transaction_id = %tx,
                    catalog_id = catalog.id(),
                    local_id = %local_id,
                    error = %undo,
                    "Failed to remove unmapped record"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Delete mapped records of `tx`, in the listed catalogs or all of them.
    /// Listed catalogs drop their refs and keep the rest of the transaction
    /// mapped; compensating everything forgets the transaction.
    ///
    /// Each catalog gets its own branch deadline.
    async fn compensate(&self, tx: &TransactionId, only: Option<&[&str]>) {
        let refs = match self.mapper.lookup(tx).await {
            Ok(refs) => refs,
            Err(e) => {
                error!(
                    subsystem = "service",
                    op = "compensate",
                    transaction_id = %tx,
                    error = %e,
                    "Mapper lookup failed during compensation"
                );
                return;
            }
        };
        let refs: Vec<CatalogRecordRef> = refs
            .into_iter()
            .filter(|r| only.map_or(true, |ids| ids.iter().any(|id| *id == r.catalog_id)))
            .collect();

        let mut targets = Vec::new();
        let mut groups: HashMap<String, Vec<CatalogRecordRef>> = HashMap::new();
        for (catalog_id, group) in group_by_catalog(refs.clone()) {
            match self.catalog(&catalog_id) {
                Some(catalog) => {
                    targets.push(catalog.clone());
                    groups.insert(catalog_id, group);
                }
                None => warn!(
                    subsystem = "service",
                    op = "compensate",
                    catalog_id = %catalog_id,
                    "Mapped catalog not configured"
                ),
            }
        }

        let results = fan_out(targets, self.policy.branch_timeout(), |catalog| {
            let refs = groups.remove(catalog.id()).unwrap_or_default();
            let tx = tx.clone();
            async move {
                for r in refs {
                    if let Err(e) = catalog.delete(&r.local_id).await {
                        error!(
                            subsystem = "service",
                            op = "compensate",
                            transaction_id = %tx,
                            catalog_id = %r.catalog_id,
                            local_id = %r.local_id,
                            error = %e,
                            "Compensating delete failed"
                        );
                    }
                }
                Ok(())
            }
        })
        .await;
        for (catalog_id, outcome) in results {
            if let Err(reason) = outcome {
                error!(
                    subsystem = "service",
                    op = "compensate",
                    transaction_id = %tx,
                    catalog_id = %catalog_id,
                    error = %reason,
                    "Compensation did not finish"
                );
            }
        }

        match only {
            Some(_) => {
                for r in &refs {
                    if let Err(e) = self.mapper.remove_ref(tx, r).await {
                        error!(
                            subsystem = "service",
                            op = "compensate",
                            transaction_id = %tx,
                            error = %e,
                            "Failed to drop mapping"
                        );
                    }
                }
            }
            None => {
                if let Err(e) = self.mapper.remove(tx).await {
                    error!(
                        subsystem = "service",
                        op = "compensate",
                        transaction_id = %tx,
                        error = %e,
                        "Failed to drop transaction mapping"
                    );
                }
            }
        }
    }

    /// Rewrite one catalog's records. Buckets already stored under the same
    /// name are updated in place, new buckets are added, and buckets the
    /// metadata no longer produces are removed.
    async fn update_branch(
        &self,
        catalog: &Catalog,
        tx: &TransactionId,
        metadata: &Metadata,
        existing: Vec<CatalogRecordRef>,
    ) -> Result<Vec<CatalogRecordRef>> {
        let mut stored: Vec<(CatalogRecordRef, Option<String>)> = Vec::with_capacity(existing.len());
        for r in existing {
            let name = catalog.fetch(&r.local_id).await?.map(|b| b.name);
            stored.push((r, name));
        }

        let mut written = Vec::new();
        for bucket in catalog.term_buckets(metadata) {
            let slot = stored
                .iter()
                .position(|(_, name)| name.as_deref() == Some(bucket.name.as_str()));
            match slot {
                Some(i) => {
                    let (r, _) = stored.remove(i);
                    catalog.update(&r.local_id, bucket).await?;
                    written.push(r);
                }
                None => {
                    let local_id = catalog.put(bucket).await?;
                    self.record_or_undo(catalog, tx, &local_id).await?;
                    written.push(CatalogRecordRef::new(catalog.id(), local_id));
                }
            }
        }

        for (r, _) in stored {
            catalog.delete(&r.local_id).await?;
            self.mapper.remove_ref(tx, &r).await?;
        }
        Ok(written)
    }

    /// Delete `refs` catalog by catalog, collecting what could not be
    /// removed.
    async fn delete_refs(&self, tx: &TransactionId, refs: Vec<CatalogRecordRef>) -> DeleteReport {
        let mut deleted = Vec::new();
        let mut remaining = Vec::new();
        let mut causes = Vec::new();

        let mut targets = Vec::new();
        let mut pending: HashMap<String, Vec<CatalogRecordRef>> = HashMap::new();
        for (catalog_id, group) in group_by_catalog(refs) {
            let reason = match self.catalog(&catalog_id) {
                Some(c) if c.can_ingest() => {
                    targets.push(c.clone());
                    pending.insert(catalog_id, group);
                    continue;
                }
                Some(_) => "ingest disabled",
                None => "catalog not configured",
            };
            causes.push(CatalogFailure::new(catalog_id, reason));
            remaining.extend(group);
        }

        let mut groups = pending.clone();
        let results = fan_out(targets, self.policy.branch_timeout(), |catalog| {
            let refs = groups.remove(catalog.id()).unwrap_or_default();
            async move {
                let mut outcome = Vec::with_capacity(refs.len());
                for r in refs {
                    let failed = catalog.delete(&r.local_id).await.err().map(|e| e.to_string());
                    outcome.push((r, failed));
                }
                Ok(outcome)
            }
        })
        .await;

        for (catalog_id, outcome) in results {
            match outcome {
                Ok(per_ref) => {
                    for (r, failed) in per_ref {
                        match failed {
                            None => deleted.push(r),
                            Some(reason) => {
                                causes.push(CatalogFailure::new(catalog_id.clone(), reason));
                                remaining.push(r);
                            }
                        }
                    }
                }
                Err(reason) => {
                    remaining.extend(pending.remove(&catalog_id).unwrap_or_default());
                    causes.push(CatalogFailure::new(catalog_id, reason));
                }
            }
        }

        for cause in &causes {
            warn!(
                subsystem = "service",
                op = "delete",
                transaction_id = %tx,
                catalog_id = %cause.catalog_id,
                error = %cause.reason,
                "Record not deleted"
            );
        }

        let failure = (!remaining.is_empty()).then(|| PartialDeleteFailure {
            transaction_id: tx.clone(),
            remaining_refs: remaining,
            causes,
        });
        DeleteReport {
            transaction_id: tx.clone(),
            deleted,
            failure,
        }
    }

    async fn run_query(
        self: &Arc<Self>,
        expr: &QueryExpression,
        candidates: Vec<Arc<Catalog>>,
    ) -> Result<Vec<TransactionalMetadata>> {
        let start = Instant::now();
        let expr = if self.policy.simplify_queries {
            expr.clone().simplify()
        } else {
            expr.clone()
        };
        let targets: Vec<Arc<Catalog>> = candidates
            .into_iter()
            .filter(|c| c.eligible_for_query(&expr))
            .collect();
        if targets.is_empty() {
            debug!(
                subsystem = "service",
                op = "query",
                query = %expr,
                "No catalog understands the query"
            );
            return Ok(Vec::new());
        }

        let results = fan_out(targets, self.policy.branch_timeout(), |catalog| {
            let inner = self.clone();
            let expr = expr.clone();
            async move { inner.query_branch(&catalog, &expr).await }
        })
        .await;

        let mut merged: Vec<TransactionalMetadata> = Vec::new();
        let mut positions: HashMap<TransactionId, usize> = HashMap::new();
        let mut failed = Vec::new();
        for (catalog_id, outcome) in results {
            let hits = match outcome {
                Ok(hits) => hits,
                Err(reason) => {
                    warn!(
                        subsystem = "service",
                        op = "query",
                        catalog_id = %catalog_id,
                        error = %reason,
                        "Catalog excluded from query result"
                    );
                    failed.push(catalog_id);
                    continue;
                }
            };
            for (tx, r, metadata) in hits {
                match positions.get(&tx) {
                    Some(&i) => {
                        merged[i].metadata.merge_distinct(&metadata);
                        if !merged[i].refs.contains(&r) {
                            merged[i].refs.push(r);
                        }
                    }
                    None => {
                        positions.insert(tx.clone(), merged.len());
                        let mut result = TransactionalMetadata::new(tx, metadata);
                        result.refs.push(r);
                        merged.push(result);
                    }
                }
            }
        }

        self.hydrate(&mut merged, &failed).await;

        let hit_count = merged.len();
        let results = fedcat_filter::run_pipeline(&self.filters, merged);
        let elapsed = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "service",
            op = "query",
            query = %expr,
            hit_count,
            result_count = results.len(),
            duration_ms = elapsed,
            slow = elapsed > defaults::SLOW_OPERATION_MS,
            "Query complete"
        );
        Ok(results)
    }

    /// Catalog hits paired with their transactions. Unmapped hits are
    /// orphans and are dropped.
    async fn query_branch(
        &self,
        catalog: &Catalog,
        expr: &QueryExpression,
    ) -> Result<Vec<(TransactionId, CatalogRecordRef, Metadata)>> {
        let hits = catalog.query(expr).await?;
        let mut paired = Vec::with_capacity(hits.len());
        for (local_id, metadata) in hits {
            match self.mapper.transaction_for(catalog.id(), &local_id).await? {
                Some(tx) => paired.push((tx, CatalogRecordRef::new(catalog.id(), local_id), metadata)),
                None => warn!(
                    subsystem = "service",
                    op = "query",
                    catalog_id = catalog.id(),
                    local_id = %local_id,
                    "Orphan record skipped"
                ),
            }
        }
        Ok(paired)
    }

    /// Merge in the metadata of mapped records the results do not carry
    /// yet, one branch per catalog. Catalogs closed to query or listed in
    /// `skip` are left out.
    async fn hydrate(&self, results: &mut [TransactionalMetadata], skip: &[String]) {
        let mut wanted: HashMap<String, Vec<(usize, CatalogRecordRef)>> = HashMap::new();
        for (i, result) in results.iter().enumerate() {
            let refs = match self.mapper.lookup(&result.transaction_id).await {
                Ok(refs) => refs,
                Err(e) => {
                    warn!(
                        subsystem = "service",
                        transaction_id = %result.transaction_id,
                        error = %e,
                        "Mapper lookup failed, result not hydrated"
                    );
                    continue;
                }
            };
            for r in refs {
                if !result.refs.contains(&r) && !skip.contains(&r.catalog_id) {
                    wanted.entry(r.catalog_id.clone()).or_default().push((i, r));
                }
            }
        }

        let targets: Vec<Arc<Catalog>> = self
            .catalogs
            .iter()
            .filter(|c| c.can_query() && wanted.contains_key(c.id()))
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }

        let fetched = fan_out(targets, self.policy.branch_timeout(), |catalog| {
            let refs = wanted.remove(catalog.id()).unwrap_or_default();
            async move {
                let mut found = Vec::with_capacity(refs.len());
                for (i, r) in refs {
                    match catalog.fetch(&r.local_id).await {
                        Ok(Some(bucket)) => found.push((i, r, catalog.reverse(&bucket))),
                        Ok(None) => debug!(
                            subsystem = "service",
                            catalog_id = %r.catalog_id,
                            local_id = %r.local_id,
                            "Mapped record missing from backend"
                        ),
                        Err(e) => warn!(
                            subsystem = "service",
                            catalog_id = %r.catalog_id,
                            local_id = %r.local_id,
                            error = %e,
                            "Failed to fetch mapped record"
                        ),
                    }
                }
                Ok(found)
            }
        })
        .await;

        for (catalog_id, outcome) in fetched {
            match outcome {
                Ok(found) => {
                    for (i, r, metadata) in found {
                        results[i].metadata.merge_distinct(&metadata);
                        results[i].refs.push(r);
                    }
                }
                Err(reason) => warn!(
                    subsystem = "service",
                    catalog_id = %catalog_id,
                    error = %reason,
                    "Catalog skipped while completing results"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AttributeDictionary, MemoryIndex};
    use fedcat_core::{QueryExpression as Q, SequentialTransactionIdFactory};

    fn service(policy: FederationPolicy) -> CatalogService {
        CatalogService::builder()
            .with_catalog(Catalog::new("a", Arc::new(MemoryIndex::new())))
            .with_catalog(
                Catalog::new("b", Arc::new(MemoryIndex::new()))
                    .with_dictionary(Arc::new(AttributeDictionary::all("Products"))),
            )
            .with_id_factory(Arc::new(SequentialTransactionIdFactory::new("tx")))
            .with_policy(policy)
            .build()
            .unwrap()
    }

    #[test]
    fn test_policy_defaults() {
        let policy = FederationPolicy::default();
        assert!(policy.one_catalog_fails_all_fail);
        assert!(policy.simplify_queries);
        assert!(!policy.restrict_ingest);
        assert_eq!(policy.branch_timeout(), Duration::from_secs(defaults::BRANCH_TIMEOUT_SECS));
    }

    #[test]
    fn test_policy_deserializes_partially() {
        let policy: FederationPolicy =
            serde_yaml::from_str("one_catalog_fails_all_fail: false\n").unwrap();
        assert!(!policy.one_catalog_fails_all_fail);
        assert!(policy.simplify_queries);
    }

    #[test]
    fn test_duplicate_catalog_rejected() {
        let result = CatalogService::builder()
            .with_catalog(Catalog::new("a", Arc::new(MemoryIndex::new())))
            .with_catalog(Catalog::new("a", Arc::new(MemoryIndex::new())))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_group_by_catalog_keeps_first_seen_order() {
        let refs = vec![
            CatalogRecordRef::new("b", LocalId::new("1")),
            CatalogRecordRef::new("a", LocalId::new("1")),
            CatalogRecordRef::new("b", LocalId::new("2")),
        ];
        let groups = group_by_catalog(refs);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a");
    }

    #[tokio::test]
    async fn test_ingest_writes_every_catalog() {
        let svc = service(FederationPolicy::default());
        let receipt = svc
            .ingest(Metadata::new().with("ProductType", "L1B"))
            .await
            .unwrap();
        assert_eq!(receipt.transaction_id.as_str(), "tx-1");
        assert_eq!(receipt.catalog_ids(), vec!["a", "b"]);
        let mapped = svc.mapper().lookup(&receipt.transaction_id).await.unwrap();
        assert_eq!(mapped.len(), receipt.refs.len());
        assert!(receipt.refs.iter().all(|r| mapped.contains(r)));
    }

    #[tokio::test]
    async fn test_restrictions_gate_operations() {
        let svc = service(FederationPolicy::default());
        svc.set_service_restrictions(true, true);
        assert!(matches!(
            svc.ingest(Metadata::new().with("k", "v")).await,
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            svc.delete(&TransactionId::new("tx-1")).await,
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            svc.query(&Q::term("k", ["v"])).await,
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(
            svc.supported_actions(),
            vec![ServiceAction::ListCatalogs, ServiceAction::ListActions]
        );
        assert!(svc.policy().restrict_ingest);
    }

    #[tokio::test]
    async fn test_ingest_into_unknown_catalog() {
        let svc = service(FederationPolicy::default());
        let result = svc.ingest_into(Metadata::new().with("k", "v"), &["zzz"]).await;
        assert!(matches!(result, Err(Error::CatalogNotFound(id)) if id == "zzz"));
    }

    #[tokio::test]
    async fn test_ingest_into_disabled_catalog() {
        let svc = service(FederationPolicy::default());
        svc.set_catalog_permissions("a", false, true).unwrap();
        let result = svc.ingest_into(Metadata::new().with("k", "v"), &["a"]).await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_ingest_with_no_targets_returns_empty_receipt() {
        let svc = service(FederationPolicy::default());
        svc.set_catalog_permissions("a", false, true).unwrap();
        svc.set_catalog_permissions("b", false, true).unwrap();
        let receipt = svc.ingest(Metadata::new().with("k", "v")).await.unwrap();
        assert!(receipt.refs.is_empty());
        assert!(!svc.mapper().contains(&receipt.transaction_id).await.unwrap());
    }

    #[test]
    fn test_unknown_catalog_permissions() {
        let svc = service(FederationPolicy::default());
        assert!(matches!(
            svc.set_catalog_permissions("zzz", true, true),
            Err(Error::CatalogNotFound(_))
        ));
    }
}
