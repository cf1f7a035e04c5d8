//! Configuration for metagame-subsets

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SubsetError};
use crate::generator::GeneratorPolicy;

/// Default store root
pub fn default_root_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("metagame-subsets"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub generator: GeneratorPolicy,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Where artifacts are read from and written to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local store root used by the generator
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// HTTP origin serving the same layout; clients read from here when set
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            base_url: None,
        }
    }
}

/// Persistence worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Archetypes written in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Finished archetypes buffered ahead of the writers
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_concurrency() -> usize {
    5
}

fn default_queue_depth() -> usize {
    16
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Client resolver timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Abort fetching the raw deck corpus after this long
    #[serde(default = "default_corpus_timeout_ms")]
    pub corpus_timeout_ms: u64,

    /// Hover delay before a speculative index fetch
    #[serde(default = "default_intent_delay_ms")]
    pub intent_delay_ms: u64,
}

fn default_corpus_timeout_ms() -> u64 {
    30_000
}

fn default_intent_delay_ms() -> u64 {
    200
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            corpus_timeout_ms: default_corpus_timeout_ms(),
            intent_delay_ms: default_intent_delay_ms(),
        }
    }
}

impl ResolverConfig {
    pub fn corpus_timeout(&self) -> Duration {
        Duration::from_millis(self.corpus_timeout_ms)
    }

    pub fn intent_delay(&self) -> Duration {
        Duration::from_millis(self.intent_delay_ms)
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubsetError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SubsetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SubsetError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| SubsetError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.persistence.concurrency == 0 {
            return Err(SubsetError::Config("persistence.concurrency must be at least 1".into()));
        }
        if self.generator.min_subset_size == 0 {
            return Err(SubsetError::Config("generator.min_subset_size must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.generator.usage_threshold_pct) {
            return Err(SubsetError::Config(
                "generator.usage_threshold_pct must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }
}
