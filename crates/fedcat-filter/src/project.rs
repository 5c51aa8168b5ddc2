//! Attribute projection over query results.

use tracing::trace;

use fedcat_core::{Metadata, QueryFilter, TransactionalMetadata};

/// Keeps only the named attributes of every record.
///
/// Attribute order inside a record is preserved. Records are never dropped,
/// even when nothing survives the projection.
#[derive(Debug, Clone)]
pub struct ProjectAttributesFilter {
    keep: Vec<String>,
}

impl ProjectAttributesFilter {
    pub fn new<I, S>(keep: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keep: keep.into_iter().map(Into::into).collect(),
        }
    }

    fn project(&self, metadata: &Metadata) -> Metadata {
        metadata
            .iter()
            .filter(|attr| self.keep.contains(&attr.name))
            .map(|attr| (attr.name.clone(), attr.values.clone()))
            .collect()
    }
}

impl QueryFilter for ProjectAttributesFilter {
    fn name(&self) -> &str {
        "project"
    }

    fn apply(&self, mut results: Vec<TransactionalMetadata>) -> Vec<TransactionalMetadata> {
        for record in &mut results {
            record.metadata = self.project(&record.metadata);
        }
        trace!(
            subsystem = "filter",
            component = "project",
            attributes = self.keep.len(),
            result_count = results.len(),
            "Projected results"
        );
        results
    }
}
