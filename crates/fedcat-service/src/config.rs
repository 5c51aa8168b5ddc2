//! Federation configuration.
//!
//! Loaded from YAML with `${VAR}` substitution, then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FEDCAT_ONE_CATALOG_FAILS_ALL_FAIL` | `policy.one_catalog_fails_all_fail` |
//! | `FEDCAT_SIMPLIFY_QUERIES` | `policy.simplify_queries` |
//! | `FEDCAT_RESTRICT_INGEST` | `policy.restrict_ingest` |
//! | `FEDCAT_RESTRICT_QUERY` | `policy.restrict_query` |
//! | `FEDCAT_BRANCH_TIMEOUT_SECS` | `policy.branch_timeout_secs` |
//! | `DATABASE_URL` | `mapper.database_url` |
//!
//! ```yaml
//! policy:
//!   one_catalog_fails_all_fail: true
//! mapper:
//!   kind: memory
//! catalogs:
//!   - id: primary
//!     index: { kind: memory }
//!     dictionaries:
//!       - kind: attribute
//!         params: { bucket: Products, attributes: [ProductType] }
//! filters:
//!   - kind: sort
//!     key: StartDateTime
//! ```

use std::env;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use thiserror::Error;
use tracing::{debug, info};

use fedcat_core::{IngestMapper, QueryFilter};
use fedcat_db::Database;
use fedcat_filter::{ProjectAttributesFilter, SortByAttributeFilter, SortOrder, TimeEventConfig, TimeEventFilter};

use crate::catalog::Catalog;
use crate::mapper::MemoryIngestMapper;
use crate::registry::BackendRegistry;
use crate::service::{CatalogService, FederationPolicy};

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for fedcat_core::Error {
    fn from(e: ConfigError) -> Self {
        fedcat_core::Error::Config(e.to_string())
    }
}

/// Where transaction mappings are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub kind: MapperKind,
    /// Falls back to `DATABASE_URL` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// A backend resolved through the [`BackendRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: String,
    #[serde(default)]
    pub params: YamlValue,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub id: String,
    #[serde(default = "enabled")]
    pub ingest: bool,
    #[serde(default = "enabled")]
    pub query: bool,
    pub index: BackendConfig,
    /// Evaluated in order. Empty means raw attribute terms.
    #[serde(default)]
    pub dictionaries: Vec<BackendConfig>,
}

/// A query filter, applied in list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterConfig {
    TimeEvent(TimeEventConfig),
    Sort {
        key: String,
        #[serde(default)]
        order: SortOrder,
    },
    Project {
        attributes: Vec<String>,
    },
}

impl FilterConfig {
    pub fn build(&self) -> Arc<dyn QueryFilter> {
        match self {
            FilterConfig::TimeEvent(config) => Arc::new(TimeEventFilter::new(config.clone())),
            FilterConfig::Sort { key, order } => Arc::new(SortByAttributeFilter::new(key.clone(), *order)),
            FilterConfig::Project { attributes } => {
                Arc::new(ProjectAttributesFilter::new(attributes.iter().cloned()))
            }
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub policy: FederationPolicy,
    pub mapper: MapperConfig,
    pub catalogs: Vec<CatalogConfig>,
    pub filters: Vec<FilterConfig>,
}

fn parse_bool(name: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

impl FederationConfig {
    /// Parse and validate YAML. No environment is consulted.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file, substituting `${VAR}` placeholders from the
    /// environment.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&Self::substitute_env_vars(&content))
    }

    /// Load `.env`, read `path`, and apply environment overrides.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        info!(subsystem = "config", path = %path.display(), "Loading federation config");
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flags: [(&str, &mut bool); 4] = [
            (
                "FEDCAT_ONE_CATALOG_FAILS_ALL_FAIL",
                &mut self.policy.one_catalog_fails_all_fail,
            ),
            ("FEDCAT_SIMPLIFY_QUERIES", &mut self.policy.simplify_queries),
            ("FEDCAT_RESTRICT_INGEST", &mut self.policy.restrict_ingest),
            ("FEDCAT_RESTRICT_QUERY", &mut self.policy.restrict_query),
        ];
        for (name, field) in flags {
            if let Some(value) = lookup(name) {
                *field = parse_bool(name, &value)?;
                debug!(subsystem = "config", variable = name, "Policy override applied");
            }
        }

        if let Some(value) = lookup("FEDCAT_BRANCH_TIMEOUT_SECS") {
            self.policy.branch_timeout_secs =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: "FEDCAT_BRANCH_TIMEOUT_SECS".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.mapper.database_url = Some(url);
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.policy.branch_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "branch_timeout_secs must be positive".to_string(),
            ));
        }
        let mut seen: Vec<&str> = Vec::new();
        for catalog in &self.catalogs {
            if catalog.id.trim().is_empty() {
                return Err(ConfigError::Validation("catalog id is empty".to_string()));
            }
            if seen.contains(&catalog.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate catalog id: {}",
                    catalog.id
                )));
            }
            seen.push(&catalog.id);
            if catalog.index.kind.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "catalog {} has no index kind",
                    catalog.id
                )));
            }
        }
        Ok(())
    }

    /// Resolve backends through `registry` and assemble the service.
    pub async fn build(&self, registry: &BackendRegistry) -> fedcat_core::Result<CatalogService> {
        let mut builder = CatalogService::builder().with_policy(self.policy.clone());

        for config in &self.catalogs {
            let index = registry.build_index(&config.index.kind, &config.index.params)?;
            let dictionaries = config
                .dictionaries
                .iter()
                .map(|d| registry.build_dictionary(&d.kind, &d.params))
                .collect::<fedcat_core::Result<Vec<_>>>()?;
            builder = builder.with_catalog(
                Catalog::new(config.id.clone(), index)
                    .with_dictionaries(dictionaries)
                    .with_permissions(config.ingest, config.query),
            );
        }

        for filter in &self.filters {
            builder = builder.with_filter(filter.build());
        }

        let mapper: Arc<dyn IngestMapper> = match self.mapper.kind {
            MapperKind::Memory => Arc::new(MemoryIngestMapper::new()),
            MapperKind::Postgres => {
                let url = self
                    .mapper
                    .database_url
                    .clone()
                    .or_else(|| env::var("DATABASE_URL").ok())
                    .ok_or_else(|| {
                        ConfigError::Validation(
                            "postgres mapper requires database_url or DATABASE_URL".to_string(),
                        )
                    })?;
                let db = Database::connect(&url).await?;
                db.migrate().await?;
                fedcat_db::log_pool_metrics(db.pool());
                Arc::new(db.ingest_mapper.clone())
            }
        };

        builder.with_mapper(mapper).build()
    }

    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
policy:
  one_catalog_fails_all_fail: false
catalogs:
  - id: primary
    index: { kind: memory }
    dictionaries:
      - kind: attribute
        params: { bucket: Products, attributes: [ProductType] }
  - id: archive
    query: false
    index: { kind: memory }
filters:
  - kind: time_event
    epsilon_ms: 5
  - kind: sort
    key: StartDateTime
    order: desc
  - kind: project
    attributes: [ProductType]
"#;

    #[test]
    fn test_parse_sample() {
        let config = FederationConfig::from_yaml_str(SAMPLE).unwrap();
        assert!(!config.policy.one_catalog_fails_all_fail);
        assert!(config.policy.simplify_queries);
        assert_eq!(config.mapper.kind, MapperKind::Memory);
        assert_eq!(config.catalogs.len(), 2);
        assert!(config.catalogs[1].ingest);
        assert!(!config.catalogs[1].query);
        assert!(config.catalogs[1].dictionaries.is_empty());
        assert_eq!(config.filters.len(), 3);
        match &config.filters[0] {
            FilterConfig::TimeEvent(c) => {
                assert_eq!(c.epsilon_ms, 5);
                assert_eq!(c.start_key, "StartDateTime");
            }
            other => panic!("unexpected filter {other:?}"),
        }
        assert_eq!(
            config.filters[1],
            FilterConfig::Sort {
                key: "StartDateTime".to_string(),
                order: SortOrder::Desc
            }
        );
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = FederationConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, FederationConfig::default());
    }

    #[test]
    fn test_duplicate_catalog_rejected() {
        let yaml = "catalogs:\n  - { id: a, index: { kind: memory } }\n  - { id: a, index: { kind: memory } }\n";
        assert!(matches!(
            FederationConfig::from_yaml_str(yaml),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("FEDCAT_ONE_CATALOG_FAILS_ALL_FAIL", "false"),
            ("FEDCAT_RESTRICT_QUERY", "1"),
            ("FEDCAT_BRANCH_TIMEOUT_SECS", "7"),
            ("DATABASE_URL", "postgres://localhost/fedcat"),
        ]
        .into_iter()
        .collect();

        let mut config = FederationConfig::default();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert!(!config.policy.one_catalog_fails_all_fail);
        assert!(config.policy.restrict_query);
        assert!(!config.policy.restrict_ingest);
        assert_eq!(config.policy.branch_timeout_secs, 7);
        assert_eq!(
            config.mapper.database_url.as_deref(),
            Some("postgres://localhost/fedcat")
        );
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = FederationConfig::default();
        let err = config
            .apply_overrides_from(|name| (name == "FEDCAT_SIMPLIFY_QUERIES").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name, .. } if name == "FEDCAT_SIMPLIFY_QUERIES"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = FederationConfig::default();
        assert!(config
            .apply_overrides_from(|name| (name == "FEDCAT_BRANCH_TIMEOUT_SECS").then(|| "0".to_string()))
            .is_err());
    }

    #[test]
    fn test_missing_placeholder_kept() {
        let content = "database_url: ${FEDCAT_TEST_UNSET_VAR_4821}";
        assert_eq!(FederationConfig::substitute_env_vars(content), content);
    }

    #[test]
    fn test_config_error_converts() {
        let err: fedcat_core::Error = ConfigError::Validation("bad".to_string()).into();
        assert!(matches!(err, fedcat_core::Error::Config(msg) if msg.contains("bad")));
    }

    #[tokio::test]
    async fn test_build_service() {
        let config = FederationConfig::from_yaml_str(SAMPLE).unwrap();
        let service = config.build(&BackendRegistry::with_defaults()).await.unwrap();
        let catalogs = service.list_catalogs();
        assert_eq!(catalogs.len(), 2);
        assert_eq!(catalogs[0].buckets, vec!["Products"]);
        assert!(!catalogs[1].query_allowed);
        assert!(!service.policy().one_catalog_fails_all_fail);
    }

    #[tokio::test]
    async fn test_build_unknown_backend() {
        let yaml = "catalogs:\n  - { id: a, index: { kind: solr } }\n";
        let config = FederationConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.build(&BackendRegistry::with_defaults()).await,
            Err(fedcat_core::Error::Config(_))
        ));
    }
}
