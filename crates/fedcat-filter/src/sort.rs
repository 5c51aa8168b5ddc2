//! Sort query results by one attribute.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::trace;

use fedcat_core::{QueryFilter, TransactionalMetadata};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Stable sort on the first value of an attribute.
///
/// Values compare numerically when both parse as numbers, otherwise as
/// strings. Records missing the attribute keep their relative order and go
/// last in either direction.
#[derive(Debug, Clone)]
pub struct SortByAttributeFilter {
    key: String,
    order: SortOrder,
}

impl SortByAttributeFilter {
    pub fn new(key: impl Into<String>, order: SortOrder) -> Self {
        Self {
            key: key.into(),
            order,
        }
    }

    pub fn ascending(key: impl Into<String>) -> Self {
        Self::new(key, SortOrder::Asc)
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self::new(key, SortOrder::Desc)
    }
}

fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}

impl QueryFilter for SortByAttributeFilter {
    fn name(&self) -> &str {
        "sort"
    }

    fn apply(&self, mut results: Vec<TransactionalMetadata>) -> Vec<TransactionalMetadata> {
        results.sort_by(|a, b| {
            match (a.metadata.get(&self.key), b.metadata.get(&self.key)) {
                (Some(x), Some(y)) => match self.order {
                    SortOrder::Asc => compare_values(x, y),
                    SortOrder::Desc => compare_values(y, x),
                },
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
        trace!(
            subsystem = "filter",
            component = "sort",
            key = %self.key,
            result_count = results.len(),
            "Sorted results"
        );
        results
    }
}
