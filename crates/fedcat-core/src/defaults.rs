//! Centralized default constants for fedcat.
//!
//! **This module is the single source of truth** for shared default values.
//! Config loading, the service, and the filters reference these constants
//! instead of defining their own magic numbers.

// =============================================================================
// FEDERATION POLICY
// =============================================================================

/// Abort (and compensate) an ingest when any single catalog fails.
pub const ONE_CATALOG_FAILS_ALL_FAIL: bool = true;

/// Flatten nested same-operator groups and collapse double negation
/// before dispatch.
pub const SIMPLIFY_QUERIES: bool = true;

/// Service-wide ingest gate.
pub const RESTRICT_INGEST: bool = false;

/// Service-wide query gate.
pub const RESTRICT_QUERY: bool = false;

// =============================================================================
// FAN-OUT
// =============================================================================

/// Per-branch timeout in seconds for ingest, query, and delete fan-out.
pub const BRANCH_TIMEOUT_SECS: u64 = 30;

/// Extra attempts a catalog makes when its index is unavailable.
pub const BACKEND_RETRY_ATTEMPTS: u32 = 1;

/// Pause before retrying an unavailable index, in milliseconds.
pub const BACKEND_RETRY_DELAY_MS: u64 = 50;

/// Fan-out operations slower than this are logged with `slow = true`.
pub const SLOW_OPERATION_MS: u64 = 1_000;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for paged queries.
pub const PAGE_SIZE: usize = 20;

// =============================================================================
// TIME-EVENT SELECTION
// =============================================================================

/// Attribute holding the event start time.
pub const TIME_EVENT_START_KEY: &str = "StartDateTime";

/// Attribute holding the event end time.
pub const TIME_EVENT_END_KEY: &str = "EndDateTime";

/// Attribute holding the event priority.
pub const TIME_EVENT_PRIORITY_KEY: &str = "Priority";

/// Overlap tolerance in milliseconds.
pub const TIME_EVENT_EPSILON_MS: i64 = 0;

/// Priority assumed when a record carries times but no priority.
pub const TIME_EVENT_DEFAULT_PRIORITY: f64 = 0.0;

// =============================================================================
// BACKENDS
// =============================================================================

/// Registry key of the reference in-memory index.
pub const MEMORY_INDEX_KIND: &str = "memory";

/// Registry key of the attribute-mapping dictionary.
pub const ATTRIBUTE_DICTIONARY_KIND: &str = "attribute";

/// Bucket name used when a catalog has no dictionaries.
pub const DEFAULT_BUCKET: &str = "default";

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum connections in the PostgreSQL pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle connections kept in the pool.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a pooled connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Seconds before an idle connection is closed.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Seconds before any connection is recycled.
pub const DB_MAX_LIFETIME_SECS: u64 = 1_800;
