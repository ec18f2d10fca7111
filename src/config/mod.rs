//! Application configuration.
//!
//! Aggregates configuration for the persistence stores into a single Config
//! struct that can be loaded from YAML files or environment variables.

mod storage;

pub use storage::{
    MongodbConfig, SagaStoreConfig, StorageConfig, SubscriptionStoreConfig, TimeoutStoreConfig,
};

use serde::Deserialize;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `GRANARY_CONFIG` environment variable (if set)
    /// 3. Environment variables with `GRANARY_` prefix
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        if let Ok(config_path) = std::env::var("GRANARY_CONFIG") {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("GRANARY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}
