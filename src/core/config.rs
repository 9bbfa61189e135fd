use crate::cluster::WireFormat;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

fn default_topic_prefix() -> String {
    "mqtt:topic:".to_string()
}

fn default_topic_set_key() -> String {
    "mqtt:topics".to_string()
}

fn default_client_filters_prefix() -> String {
    "mqtt:client:topics:".to_string()
}

/// Top-level configuration for the subscription index.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identity stamped on outbound cluster envelopes; peers drop events
    /// carrying their own id.
    pub broker_id: String,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store_keys: StoreKeysConfig,
    /// Serialization for cluster envelopes; every peer must agree.
    #[serde(default)]
    pub wire_format: WireFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConfig {
    /// Broadcast subscribe/unsubscribe events to peers.
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Mirror the durable tier into a local read cache. Requires a blocking
    /// reload at startup; the fan-out query then never touches the store.
    #[serde(default)]
    pub enable_inner_cache: bool,
}

/// Key layout of the shared store. All brokers must use identical values.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreKeysConfig {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_topic_set_key")]
    pub topic_set_key: String,
    #[serde(default = "default_client_filters_prefix")]
    pub client_filters_prefix: String,
}

impl Default for StoreKeysConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            topic_set_key: default_topic_set_key(),
            client_filters_prefix: default_client_filters_prefix(),
        }
    }
}

impl Config {
    /// Minimal standalone configuration: no cluster, no inner cache,
    /// default key layout.
    pub fn standalone(broker_id: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            cluster: ClusterConfig::default(),
            cache: CacheConfig::default(),
            store_keys: StoreKeysConfig::default(),
            wire_format: WireFormat::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_id.is_empty() {
            bail!("broker_id can't be empty");
        }
        if self.store_keys.topic_prefix.is_empty() {
            bail!("store_keys.topic_prefix can't be empty");
        }
        if self.store_keys.topic_set_key.is_empty() {
            bail!("store_keys.topic_set_key can't be empty");
        }
        if self.store_keys.client_filters_prefix.is_empty() {
            bail!("store_keys.client_filters_prefix can't be empty");
        }
        Ok(())
    }
}
