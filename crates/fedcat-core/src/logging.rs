//! Structured logging schema and field name constants for fedcat.
//!
//! All crates use these constants for consistent structured logging fields.
//! This ensures log aggregation tools (Loki, Elasticsearch) can query by
//! standardized field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention (compensation failed) |
//! | WARN  | Recoverable issue: catalog branch failed, orphan record, retry |
//! | INFO  | Lifecycle events (startup, catalogs loaded), operation completions |
//! | DEBUG | Decision points: eligible catalogs, simplified query, policy choices |
//! | TRACE | Per-item iteration: per-bucket puts, per-hit reverse lookups |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "service", "catalog", "mapper", "filter", "db", "config"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "ingest", "query", "delete", "time_event", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "ingest", "query", "compensate", "record", "lookup"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Transaction id of the logical record being operated on.
pub const TRANSACTION_ID: &str = "transaction_id";

/// Catalog id a fan-out branch targets.
pub const CATALOG_ID: &str = "catalog_id";

/// Backend-local record id.
pub const LOCAL_ID: &str = "local_id";

/// Term bucket name.
pub const BUCKET: &str = "bucket";

/// Rendered query expression.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query or filter.
pub const RESULT_COUNT: &str = "result_count";

/// Number of catalogs targeted by a fan-out.
pub const CATALOG_COUNT: &str = "catalog_count";

/// Number of record refs touched.
pub const REF_COUNT: &str = "ref_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Database table or entity affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Number of catalogs that failed during a fan-out.
pub const FAILURE_COUNT: &str = "failure_count";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
