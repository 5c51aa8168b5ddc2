//! Reference in-memory index.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::trace;

use fedcat_core::{
    Index, IndexHit, LocalId, NativeQuery, QueryExpression, QueryNode, Result, TermBucket,
};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

fn tokens(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn compare(left: &str, right: &str) -> Ordering {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.total_cmp(&b),
        _ => left.cmp(right),
    }
}

fn term_values<'a>(bucket: &'a TermBucket, name: &str) -> &'a [String] {
    bucket.term(name).map(|t| t.values.as_slice()).unwrap_or_default()
}

/// Evaluate `expr` against one stored bucket.
pub fn matches(expr: &QueryExpression, bucket: &TermBucket) -> bool {
    let values = |name: &str| term_values(bucket, name);
    match &expr.node {
        QueryNode::Term { name, values: wanted } => {
            values(name).iter().any(|v| wanted.contains(v))
        }
        QueryNode::Comparison { name, op, value } => values(name)
            .iter()
            .any(|v| op.accepts(compare(v, value))),
        QueryNode::FreeText { name, text } => {
            let wanted = tokens(text);
            if wanted.is_empty() {
                return false;
            }
            let haystack: Vec<String> = match name {
                Some(n) => values(n).iter().flat_map(|v| tokens(v)).collect(),
                None => bucket
                    .terms
                    .iter()
                    .flat_map(|t| t.values.iter())
                    .flat_map(|v| tokens(v))
                    .collect(),
            };
            wanted.iter().all(|w| haystack.contains(w))
        }
        QueryNode::Not { child } => !matches(child, bucket),
        QueryNode::Group { op, children } => match op {
            fedcat_core::LogicalOp::And => children.iter().all(|c| matches(c, bucket)),
            fedcat_core::LogicalOp::Or => children.iter().any(|c| matches(c, bucket)),
        },
    }
}

/// [`Index`] holding buckets in a map. Local ids are sequential integers.
#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<BTreeMap<u64, TermBucket>>,
    next_id: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(id: &LocalId) -> Option<u64> {
        id.as_str().parse().ok()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn contains(&self, id: &LocalId) -> bool {
        match Self::key(id) {
            Some(k) => self.records.read().await.contains_key(&k),
            None => false,
        }
    }
}

#[async_trait]
impl Index for MemoryIndex {
    async fn put(&self, bucket: TermBucket) -> Result<LocalId> {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        self.records.write().await.insert(id, bucket);
        Ok(LocalId::new(id.to_string()))
    }

    async fn update(&self, id: &LocalId, bucket: TermBucket) -> Result<()> {
        let mut records = self.records.write().await;
        match Self::key(id).and_then(|k| records.get_mut(&k)) {
            Some(slot) => {
                *slot = bucket;
                Ok(())
            }
            None => Err(fedcat_core::Error::NotFound(format!("record {id}"))),
        }
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        if let Some(k) = Self::key(id) {
            self.records.write().await.remove(&k);
        }
        Ok(())
    }

    async fn query(&self, query: &NativeQuery) -> Result<Vec<IndexHit>> {
        let records = self.records.read().await;
        let hits: Vec<IndexHit> = records
            .iter()
            .filter(|(_, bucket)| bucket.name == query.bucket)
            .filter(|(_, bucket)| matches(&query.expression, bucket))
            .map(|(id, bucket)| IndexHit::new(LocalId::new(id.to_string()), bucket.clone()))
            .collect();
        trace!(
            subsystem = "catalog",
            component = "memory_index",
            op = "query",
            bucket = %query.bucket,
            result_count = hits.len(),
            "Evaluated query"
        );
        Ok(hits)
    }

    async fn fetch(&self, id: &LocalId) -> Result<Option<TermBucket>> {
        Ok(match Self::key(id) {
            Some(k) => self.records.read().await.get(&k).cloned(),
            None => None,
        })
    }
}
