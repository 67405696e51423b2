//! Configuration management for the maskfit system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};

/// Model families that can sit behind the train/infer contract.
pub const MODEL_BACKENDS: [&str; 3] = ["gradient", "forest", "hierarchical"];

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Deployment environment, used as the first registry key segment.
    #[serde(default = "default_environment")]
    pub environment: String,
    pub registry: RegistryConfig,
    pub imputation: ImputationConfig,
    pub encoding: EncodingConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order, later sources overriding earlier:
    /// 1. Built-in defaults
    /// 2. config/default.toml (base settings)
    /// 3. config/{MASKFIT_ENV}.toml (environment-specific)
    /// 4. Environment variables with MASKFIT_ prefix
    pub fn load() -> CoreResult<Self> {
        let env = std::env::var("MASKFIT_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default_config())?)
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("MASKFIT").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with defaults for testing/development.
    pub fn default_config() -> Self {
        Self {
            environment: default_environment(),
            registry: RegistryConfig::default(),
            imputation: ImputationConfig::default(),
            encoding: EncodingConfig::default(),
            training: TrainingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> CoreResult<()> {
        if self.environment.is_empty() {
            return Err(CoreError::ConfigError("environment must not be empty".into()));
        }

        if !MODEL_BACKENDS.contains(&self.training.backend.as_str()) {
            return Err(CoreError::ConfigError(format!(
                "training.backend must be one of {:?}, got {}",
                MODEL_BACKENDS, self.training.backend
            )));
        }

        if self.training.epochs == 0 {
            return Err(CoreError::ConfigError(
                "training.epochs must be greater than 0".into(),
            ));
        }

        if self.training.hidden_dim == 0 {
            return Err(CoreError::ConfigError(
                "training.hidden_dim must be greater than 0".into(),
            ));
        }

        if !(self.training.validation_fraction > 0.0 && self.training.validation_fraction < 1.0) {
            return Err(CoreError::ConfigError(
                "training.validation_fraction must be in (0, 1)".into(),
            ));
        }

        if !(self.training.precision_target > 0.0 && self.training.precision_target <= 1.0) {
            return Err(CoreError::ConfigError(
                "training.precision_target must be in (0, 1]".into(),
            ));
        }

        if self.training.trees == 0 {
            return Err(CoreError::ConfigError(
                "training.trees must be greater than 0".into(),
            ));
        }

        if self.training.mcmc_draws <= self.training.mcmc_burn_in {
            return Err(CoreError::ConfigError(
                "training.mcmc_draws must exceed training.mcmc_burn_in".into(),
            ));
        }

        if self.imputation.donor_k == 0 {
            return Err(CoreError::ConfigError(
                "imputation.donor_k must be greater than 0".into(),
            ));
        }

        if self.encoding.bin_width_mm <= 0.0 || self.training.hier_bin_width_mm <= 0.0 {
            return Err(CoreError::ConfigError(
                "perimeter bin widths must be greater than 0".into(),
            ));
        }

        if self.encoding.z_score_limit <= 0.0 {
            return Err(CoreError::ConfigError(
                "encoding.z_score_limit must be greater than 0".into(),
            ));
        }

        if self.registry.backend != "memory" {
            let path = PathBuf::from(&self.registry.root);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(CoreError::ConfigError(format!(
                        "registry.root parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Artifact registry backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Blob store backend: "fs" or "memory".
    pub backend: String,
    /// Root directory for the filesystem backend.
    pub root: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "fs".to_string(),
            root: "./data/registry".to_string(),
        }
    }
}

/// Cross-user measurement imputation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImputationConfig {
    /// Maximum number of donor users averaged per imputed measurement.
    pub donor_k: usize,
    /// Minimum cosine similarity a donor must reach to qualify.
    pub similarity_floor: f64,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            donor_k: 5,
            similarity_floor: 0.0,
        }
    }
}

/// Feature encoding settings shared by training and inference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncodingConfig {
    /// Width of the perimeter-difference bins, in millimeters.
    pub bin_width_mm: f64,
    /// Rows with any `_z_score` column beyond this absolute value are dropped.
    pub z_score_limit: f64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            bin_width_mm: 10.0,
            z_score_limit: 2.25,
        }
    }
}

/// Trainer settings covering all three model families.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    /// Model family: "gradient", "forest", or "hierarchical".
    pub backend: String,
    /// Default dataset location when a train request names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    /// Epoch budget for the gradient classifier.
    pub epochs: usize,
    /// Hidden layer width for the gradient classifier.
    pub hidden_dim: usize,
    /// AdamW learning rate.
    pub learning_rate: f64,
    /// Fraction of rows held out for validation and threshold tuning.
    pub validation_fraction: f64,
    /// Minimum precision a tuned threshold must reach.
    pub precision_target: f64,
    /// Number of trees in the forest ensemble.
    pub trees: usize,
    /// Maximum depth per tree.
    pub max_depth: usize,
    /// Minimum samples per leaf before a split is abandoned.
    pub min_leaf: usize,
    /// Total Markov-chain draws for the hierarchical model.
    pub mcmc_draws: usize,
    /// Draws discarded as burn-in.
    pub mcmc_burn_in: usize,
    /// Perimeter-difference bin width used by the hierarchical model.
    pub hier_bin_width_mm: f64,
    /// Seed for every stochastic component.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            backend: "gradient".to_string(),
            data_url: None,
            epochs: 80,
            hidden_dim: 16,
            learning_rate: 0.01,
            validation_fraction: 0.2,
            precision_target: 0.7,
            trees: 200,
            max_depth: 8,
            min_leaf: 2,
            mcmc_draws: 2500,
            mcmc_burn_in: 500,
            hier_bin_width_mm: 15.0,
            seed: 42,
        }
    }
}

/// Logging settings consumed by binary entry points.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default tracing filter, overridden by `RUST_LOG`.
    pub level: String,
    /// Log formatter: "pretty" or "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.environment, "development");
        assert_eq!(config.imputation.donor_k, 5);
        assert_eq!(config.encoding.z_score_limit, 2.25);
        assert_eq!(config.training.backend, "gradient");
    }

    #[test]
    fn test_validation_passes() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_fails_zero_epochs() {
        let mut config = Config::default_config();
        config.training.epochs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_fails_unknown_backend() {
        let mut config = Config::default_config();
        config.training.backend = "boosted".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("training.backend"));
    }

    #[test]
    fn test_validation_fails_zero_donor_k() {
        let mut config = Config::default_config();
        config.imputation.donor_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_fails_degenerate_validation_fraction() {
        let mut config = Config::default_config();
        config.training.validation_fraction = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_fails_burn_in_exceeds_draws() {
        let mut config = Config::default_config();
        config.training.mcmc_burn_in = config.training.mcmc_draws;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default_config();

        let toml_str = toml::to_string(&config).expect("Config must serialize to TOML");
        let deserialized: Config =
            toml::from_str(&toml_str).expect("Config must deserialize from TOML");

        assert_eq!(deserialized.environment, config.environment);
        assert_eq!(deserialized.registry.backend, config.registry.backend);
        assert_eq!(deserialized.imputation.donor_k, config.imputation.donor_k);
        assert_eq!(
            deserialized.imputation.similarity_floor,
            config.imputation.similarity_floor
        );
        assert_eq!(deserialized.encoding.bin_width_mm, config.encoding.bin_width_mm);
        assert_eq!(deserialized.training.epochs, config.training.epochs);
        assert_eq!(deserialized.training.seed, config.training.seed);
        assert_eq!(deserialized.logging.level, config.logging.level);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config::default_config();

        let json_str = serde_json::to_string(&config).expect("Config must serialize to JSON");
        let deserialized: Config =
            serde_json::from_str(&json_str).expect("Config must deserialize from JSON");

        assert_eq!(deserialized.training.backend, config.training.backend);
        assert_eq!(
            deserialized.training.precision_target,
            config.training.precision_target
        );
        assert_eq!(deserialized.registry.root, config.registry.root);
    }

    #[test]
    fn test_config_from_toml_string() {
        let toml_str = r#"
            environment = "staging"

            [registry]
            backend = "memory"
            root = "/tmp/registry"

            [imputation]
            donor_k = 3
            similarity_floor = 0.1

            [encoding]
            bin_width_mm = 15.0
            z_score_limit = 2.0

            [training]
            backend = "forest"
            epochs = 10
            hidden_dim = 8
            learning_rate = 0.005
            validation_fraction = 0.25
            precision_target = 0.8
            trees = 50
            max_depth = 6
            min_leaf = 4
            mcmc_draws = 1000
            mcmc_burn_in = 200
            hier_bin_width_mm = 20.0
            seed = 7

            [logging]
            level = "debug"
            format = "compact"
        "#;

        let config: Config = toml::from_str(toml_str).expect("Config must parse from TOML");

        assert_eq!(config.environment, "staging");
        assert_eq!(config.registry.backend, "memory");
        assert_eq!(config.imputation.donor_k, 3);
        assert_eq!(config.encoding.bin_width_mm, 15.0);
        assert_eq!(config.training.backend, "forest");
        assert_eq!(config.training.trees, 50);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
