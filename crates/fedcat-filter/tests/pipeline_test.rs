//! Integration tests for composing query filters.

use std::sync::Arc;

use fedcat_core::{Metadata, QueryFilter, TransactionId, TransactionalMetadata};
use fedcat_filter::{
    run_pipeline, ProjectAttributesFilter, SortByAttributeFilter, TimeEventConfig,
    TimeEventFilter,
};

fn record(tx: &str, start: &str, end: &str, priority: &str) -> TransactionalMetadata {
    TransactionalMetadata::new(
        TransactionId::new(tx),
        Metadata::new()
            .with("Name", tx)
            .with("StartDateTime", start)
            .with("EndDateTime", end)
            .with("Priority", priority),
    )
}

fn names(results: &[TransactionalMetadata]) -> Vec<&str> {
    results.iter().map(|r| r.transaction_id.as_str()).collect()
}

#[test]
fn test_empty_pipeline_is_identity() {
    let input = vec![record("a", "0", "10", "1"), record("b", "5", "15", "2")];
    let output = run_pipeline(&[], input.clone());
    assert_eq!(output, input);
}

#[test]
fn test_selection_then_sort_then_project() {
    let filters: Vec<Arc<dyn QueryFilter>> = vec![
        Arc::new(TimeEventFilter::default()),
        Arc::new(SortByAttributeFilter::descending("StartDateTime")),
        Arc::new(ProjectAttributesFilter::new(["Name"])),
    ];
    let input = vec![
        record("a", "0", "10", "5"),
        record("b", "5", "15", "3"),
        record("c", "10", "20", "5"),
    ];

    let output = run_pipeline(&filters, input);
    assert_eq!(names(&output), vec!["c", "a"]);
    assert!(output.iter().all(|r| r.metadata.len() == 1));
}

#[test]
fn test_order_matters() {
    // Projection first strips the temporal attributes, so every record
    // passes the selection unchanged.
    let filters: Vec<Arc<dyn QueryFilter>> = vec![
        Arc::new(ProjectAttributesFilter::new(["Name"])),
        Arc::new(TimeEventFilter::default()),
    ];
    let input = vec![
        record("a", "0", "10", "5"),
        record("b", "5", "15", "3"),
        record("c", "10", "20", "5"),
    ];
    assert_eq!(names(&run_pipeline(&filters, input)), vec!["a", "b", "c"]);
}

#[test]
fn test_rfc3339_events_with_epsilon() {
    let filter = TimeEventFilter::new(TimeEventConfig {
        epsilon_ms: 60_000,
        ..TimeEventConfig::default()
    });
    let input = vec![
        record("a", "2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z", "2"),
        // Overlaps `a` by thirty seconds, within epsilon.
        record("b", "2024-01-01T00:59:30Z", "2024-01-01T02:00:00Z", "2"),
    ];
    assert_eq!(names(&filter.apply(input)), vec!["a", "b"]);
}
