//! # fedcat-filter
//!
//! Post-merge query filters for fedcat.
//!
//! This crate provides:
//! - Weighted time-event selection (maximum-priority non-overlapping events)
//! - Attribute sort
//! - Attribute projection
//! - [`run_pipeline`] to apply filters in registration order
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use fedcat_core::QueryFilter;
//! use fedcat_filter::{run_pipeline, SortByAttributeFilter, TimeEventFilter};
//!
//! let filters: Vec<Arc<dyn QueryFilter>> = vec![
//!     Arc::new(TimeEventFilter::default()),
//!     Arc::new(SortByAttributeFilter::descending("Priority")),
//! ];
//! let results = run_pipeline(&filters, Vec::new());
//! assert!(results.is_empty());
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use fedcat_core::{QueryFilter, TransactionalMetadata};

pub mod project;
pub mod sort;
pub mod time_event;

pub use project::ProjectAttributesFilter;
pub use sort::{SortByAttributeFilter, SortOrder};
pub use time_event::{parse_time_ms, TimeEventConfig, TimeEventFilter};

/// Apply `filters` to `results` in order.
pub fn run_pipeline(
    filters: &[Arc<dyn QueryFilter>],
    mut results: Vec<TransactionalMetadata>,
) -> Vec<TransactionalMetadata> {
    for filter in filters {
        let start = Instant::now();
        let before = results.len();
        results = filter.apply(results);
        debug!(
            subsystem = "filter",
            component = "pipeline",
            filter = filter.name(),
            input_count = before,
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Filter applied"
        );
    }
    results
}
