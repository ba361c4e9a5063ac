//! Process configuration (§6's enumerated config tree), loaded once at startup from JSON.
//!
//! No dynamic reload — the non-goals explicitly exclude it. Adapted from the teacher's
//! `config.rs` load path (`File::open` + `serde_json::from_reader`), trimmed to this service's
//! flatter, non-platform-specific tree.

use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use anyhow::Context as _;
use camino::Utf8Path;
use serde::Deserialize;

fn default_duration_secs<const SECS: u64>() -> Duration {
    Duration::from_secs(SECS)
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// `retry.*`, shared shape across `aggregate`, `keyValueStore` and `indexing` (§6, C8).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", tag = "strategy", content = "params")]
pub enum RetryConfig {
    Never,
    Once,
    Constant {
        #[serde(rename = "delaySecs")]
        delay_secs: u64,
    },
    Exponential {
        #[serde(rename = "initialSecs")]
        initial_secs: u64,
        #[serde(rename = "maxDelaySecs")]
        max_delay_secs: u64,
        #[serde(rename = "maxRetries")]
        max_retries: u32,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Exponential {
            initial_secs: 1,
            max_delay_secs: 30,
            max_retries: 5,
        }
    }
}

impl From<&RetryConfig> for crate::retry::RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        use crate::retry::RetryPolicy;
        match *config {
            RetryConfig::Never => RetryPolicy::Never,
            RetryConfig::Once => RetryPolicy::Once,
            RetryConfig::Constant { delay_secs } => RetryPolicy::Constant {
                delay: Duration::from_secs(delay_secs),
            },
            RetryConfig::Exponential {
                initial_secs,
                max_delay_secs,
                max_retries,
            } => RetryPolicy::exponential(Duration::from_secs(initial_secs), Duration::from_secs(max_delay_secs), max_retries),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassivationConfig {
    #[serde(default = "default_duration_secs::<300>", deserialize_with = "deserialize_duration_secs")]
    pub lapsed_since_last_interaction: Duration,
    #[serde(default = "default_duration_secs::<60>", deserialize_with = "deserialize_duration_secs")]
    pub lapsed_since_recovery_completed: Duration,
}

impl Default for PassivationConfig {
    fn default() -> Self {
        Self {
            lapsed_since_last_interaction: Duration::from_secs(300),
            lapsed_since_recovery_completed: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateConfig {
    #[serde(default = "default_duration_secs::<5>", deserialize_with = "deserialize_duration_secs")]
    pub ask_timeout: Duration,
    #[serde(default = "default_duration_secs::<5>", deserialize_with = "deserialize_duration_secs")]
    pub command_evaluation_timeout: Duration,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub passivation: PassivationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_shards() -> u32 {
    64
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(5),
            command_evaluation_timeout: Duration::from_secs(5),
            shards: default_shards(),
            passivation: PassivationConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueStoreConfig {
    #[serde(default = "default_duration_secs::<5>", deserialize_with = "deserialize_duration_secs")]
    pub ask_timeout: Duration,
    #[serde(default = "default_duration_secs::<10>", deserialize_with = "deserialize_duration_secs")]
    pub consistency_timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for KeyValueStoreConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(5),
            consistency_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressConfig {
    #[serde(default = "default_persist_after_processed")]
    pub persist_after_processed: u64,
    #[serde(default = "default_duration_secs::<10>", deserialize_with = "deserialize_duration_secs")]
    pub max_time_window: Duration,
}

fn default_persist_after_processed() -> u64 {
    200
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            persist_after_processed: default_persist_after_processed(),
            max_time_window: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingConfig {
    #[serde(default = "default_batch")]
    pub batch: usize,
    #[serde(default = "default_batch_timeout", deserialize_with = "deserialize_duration_secs")]
    pub batch_timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

fn default_batch() -> usize {
    200
}

fn default_batch_timeout() -> Duration {
    Duration::from_millis(500)
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch: default_batch(),
            batch_timeout: default_batch_timeout(),
            retry: RetryConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

/// The root configuration object (§6). Constructed once at startup and threaded explicitly
/// through the service's root context — no ambient global (§9's design note).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_listener_url")]
    pub listener_url: String,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub key_value_store: KeyValueStoreConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

fn default_listener_url() -> String {
    "http://0.0.0.0:8080".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener_url: default_listener_url(),
            aggregate: AggregateConfig::default(),
            key_value_store: KeyValueStoreConfig::default(),
            indexing: IndexingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file at `path`, falling back to defaults for any field
    /// the file omits.
    pub fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open config file at {path}"))?;
        let config = serde_json::from_reader(BufReader::new(file)).context("invalid JSON config")?;
        Ok(config)
    }
}
