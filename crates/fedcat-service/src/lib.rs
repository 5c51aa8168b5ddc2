//! # fedcat-service
//!
//! Catalog service orchestrator for the fedcat federated metadata catalog.
//!
//! This crate provides:
//! - [`Catalog`]: one index bound to its ordered dictionaries
//! - [`CatalogService`]: concurrent ingest, query, update and delete across
//!   catalogs, with all-or-nothing compensation
//! - [`MemoryIngestMapper`]: process-local transaction mapping
//! - [`BackendRegistry`]: backend kinds resolved from configuration
//! - [`FederationConfig`]: YAML configuration with environment overrides
//! - [`telemetry::init_tracing`]: subscriber setup
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fedcat_service::backends::{AttributeDictionary, MemoryIndex};
//! use fedcat_service::{Catalog, CatalogService, Metadata, QueryExpression};
//!
//! let service = CatalogService::builder()
//!     .with_catalog(
//!         Catalog::new("primary", Arc::new(MemoryIndex::new()))
//!             .with_dictionary(Arc::new(AttributeDictionary::all("Products"))),
//!     )
//!     .build()?;
//!
//! let receipt = service
//!     .ingest(Metadata::new().with("ProductType", "L1B"))
//!     .await?;
//! let results = service
//!     .query(&QueryExpression::term("ProductType", ["L1B"]))
//!     .await?;
//! assert_eq!(results[0].transaction_id, receipt.transaction_id);
//! ```

pub mod backends;
pub mod catalog;
pub mod config;
pub mod mapper;
pub mod registry;
pub mod service;
pub mod telemetry;

// Re-export core types
pub use fedcat_core::*;

pub use catalog::{Catalog, RetryPolicy};
pub use config::{
    BackendConfig, CatalogConfig, ConfigError, FederationConfig, FilterConfig, MapperConfig,
    MapperKind,
};
pub use mapper::MemoryIngestMapper;
pub use registry::BackendRegistry;
pub use service::{CatalogService, CatalogServiceBuilder, FederationPolicy};
