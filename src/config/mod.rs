//! Unified configuration for the dimjoin pipeline.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (dimjoin.toml)
//! ```toml
//! [dedup]
//! sort_chains = false
//!
//! [join]
//! partitions = 4
//! window_days = 7
//!
//! [schema]
//! end_dates = "inclusive"
//!
//! [[schema.attributes]]
//! name = "product_id"
//! kind = "integer"
//!
//! [[schema.attributes]]
//! name = "interest_rate"
//! kind = "decimal"
//! scale = 2
//!
//! [paths]
//! agreements = "data/dim_dep_agreement.csv"
//! output = "out/enriched.csv"
//! ```
//!
//! Environment variables use the `DIMJOIN_` prefix and `__` between section and
//! key, e.g. `DIMJOIN_JOIN__PARTITIONS=8`.

mod defaults;

pub use defaults::*;

use crate::model::AttributeSchema;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Version-chain compaction
    pub dedup: DedupConfig,
    /// Transaction join pass
    pub join: JoinConfig,
    /// Tracked attributes of the dimension
    pub schema: AttributeSchema,
    /// Input and output files
    pub paths: PathsConfig,
    /// Synthetic data generation
    pub generator: GeneratorConfig,
}

impl PipelineConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(PipelineConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with DIMJOIN_ prefix
        figment = figment.merge(Env::prefixed("DIMJOIN_").split("__"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: PipelineConfig = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.is_empty() {
            return Err(ConfigError::new("schema must track at least one attribute"));
        }
        if self.join.partitions == 0 {
            return Err(ConfigError::new("join.partitions must be at least 1"));
        }
        if self.join.window_days == 0 {
            return Err(ConfigError::new("join.window_days must be at least 1"));
        }
        let mut seen = std::collections::HashSet::new();
        for name in self.schema.names() {
            if !seen.insert(name) {
                return Err(ConfigError::new(format!(
                    "schema attribute `{name}` is listed twice"
                )));
            }
        }
        Ok(())
    }
}

/// Version-chain compaction settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Sort each entity's versions by `valid_from` before validating the chain
    pub sort_chains: bool,
}

/// Transaction join settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Group-key shards resolved in parallel
    pub partitions: usize,
    /// Attach the rolling transaction count to each enriched row
    pub rolling_window: bool,
    /// Look-back length of the rolling count
    pub window_days: u32,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            rolling_window: true,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

/// Input and output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub agreements: PathBuf,
    pub users: PathBuf,
    pub transactions: PathBuf,
    /// Enriched transaction rows
    pub output: PathBuf,
    /// Deduplicated dimension rows
    pub dedup_output: PathBuf,
    /// Per-category summary
    pub summary_output: PathBuf,
    /// Replace output files that already exist
    pub overwrite: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            agreements: PathBuf::from(DEFAULT_AGREEMENTS_PATH),
            users: PathBuf::from(DEFAULT_USERS_PATH),
            transactions: PathBuf::from(DEFAULT_TRANSACTIONS_PATH),
            output: PathBuf::from(DEFAULT_OUTPUT_PATH),
            dedup_output: PathBuf::from(DEFAULT_DEDUP_OUTPUT_PATH),
            summary_output: PathBuf::from(DEFAULT_SUMMARY_OUTPUT_PATH),
            overwrite: false,
        }
    }
}

/// Synthetic data generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub users: usize,
    pub transactions: usize,
    /// Users that receive transactions (capped at `users`)
    pub transacting_users: usize,
    /// Upper bound on versions per agreement chain
    pub max_versions: usize,
    pub active_ratio: f64,
    pub blocked_ratio: f64,
    pub preferred_category_ratio: f64,
    pub repeat_terms_ratio: f64,
    pub max_category: u32,
    pub lookback_days: u32,
    /// Day transactions are dated back from, `YYYY-MM-DD`; today when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            users: DEFAULT_USER_COUNT,
            transactions: DEFAULT_TRANSACTION_COUNT,
            transacting_users: DEFAULT_TRANSACTING_USERS,
            max_versions: DEFAULT_MAX_VERSIONS,
            active_ratio: DEFAULT_ACTIVE_RATIO,
            blocked_ratio: DEFAULT_BLOCKED_RATIO,
            preferred_category_ratio: DEFAULT_PREFERRED_CATEGORY_RATIO,
            repeat_terms_ratio: DEFAULT_REPEAT_TERMS_RATIO,
            max_category: DEFAULT_MAX_CATEGORY,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            reference_date: None,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<PathOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_window: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreements: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttrKind;
    use crate::temporal::EndDates;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.schema.end_dates, EndDates::Inclusive);
        assert!(!config.dedup.sort_chains);
        assert_eq!(config.join.partitions, DEFAULT_PARTITIONS);
        assert_eq!(config.join.window_days, DEFAULT_WINDOW_DAYS);
        assert_eq!(config.schema.len(), 2);
        assert_eq!(config.schema.attributes[1].kind, AttrKind::Decimal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_end_dates_serde() {
        let json = serde_json::to_string(&EndDates::Inclusive).unwrap();
        assert_eq!(json, "\"inclusive\"");

        let end_dates: EndDates = serde_json::from_str("\"exclusive\"").unwrap();
        assert_eq!(end_dates, EndDates::Exclusive);
    }

    #[test]
    fn test_load_file_and_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[dedup]
sort_chains = true

[join]
partitions = 2

[schema]
end_dates = "exclusive"

[[schema.attributes]]
name = "product_id"
kind = "integer"

[[schema.attributes]]
name = "tier"
kind = "text"
"#
        )
        .unwrap();

        let overrides = ConfigOverrides {
            join: Some(JoinOverrides {
                partitions: Some(6),
                rolling_window: None,
            }),
            ..Default::default()
        };
        let path = file.path().to_str().unwrap().to_string();
        let config = PipelineConfig::load(Some(&path), overrides).unwrap();

        assert!(config.dedup.sort_chains);
        assert_eq!(config.schema.end_dates, EndDates::Exclusive);
        assert_eq!(config.join.partitions, 6);
        assert!(config.join.rolling_window);
        assert_eq!(config.schema.names().collect::<Vec<_>>(), vec!["product_id", "tier"]);
    }

    #[test]
    fn test_validate_rejects_duplicate_attribute() {
        let mut config = PipelineConfig::default();
        config
            .schema
            .attributes
            .push(crate::model::AttributeSpec::integer("product_id"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("product_id"));
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let mut config = PipelineConfig::default();
        config.join.partitions = 0;
        assert!(config.validate().is_err());
    }
}
