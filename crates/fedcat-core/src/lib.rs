//! # fedcat-core
//!
//! Core types, traits, and abstractions for the fedcat federated catalog.
//!
//! This crate provides the data model, the query expression tree, and the
//! backend, mapper, and filter traits that the other fedcat crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{CatalogFailure, Error, Result};
pub use models::*;
pub use query::{ComparisonOp, ExpressionKind, LogicalOp, NativeQuery, QueryExpression, QueryNode};
pub use traits::*;
pub use uuid_utils::{SequentialTransactionIdFactory, UuidV7TransactionIdFactory};
