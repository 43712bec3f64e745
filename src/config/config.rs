use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Raw subgraph payloads (staging tables)
/// - Pools, tokens, gauges and their daily snapshots
/// - Derived APR rows
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Mainnet RPC access used for gauge controller reads.
#[derive(Debug, Deserialize, Clone)]
pub struct EthereumSettings {
    pub rpc_url: Url,
    #[serde(default = "default_gauge_controller")]
    pub gauge_controller: String,
    /// Number of `gauge_relative_weight` calls packed in one multicall
    #[serde(default = "default_multicall_batch_size")]
    pub multicall_batch_size: usize,
}

fn default_gauge_controller() -> String {
    "0xC128468b7Ce63eA702C1f104D55A2566b13D3ABD".to_string()
}

fn default_multicall_batch_size() -> usize {
    100
}

/// Per-network overrides on top of the static registry.
///
/// `rpc_url` is only needed for networks whose rate providers should be read
/// for token-yield APR.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NetworkOverride {
    #[serde(default)]
    pub subgraph_url: Option<Url>,
    #[serde(default)]
    pub rpc_url: Option<Url>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceSettings {
    #[serde(default = "default_defillama_url")]
    pub defillama_url: String,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            defillama_url: default_defillama_url(),
        }
    }
}

fn default_defillama_url() -> String {
    "https://coins.llama.fi".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EtlSettings {
    /// Interval between scheduled ETL runs in `serve` mode
    #[serde(default = "default_etl_interval")]
    pub interval_secs: u64,
    /// How many past days of token rates are read from rate providers
    #[serde(default = "default_token_yield_lookback")]
    pub token_yield_lookback_days: u32,
}

impl Default for EtlSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_etl_interval(),
            token_yield_lookback_days: default_token_yield_lookback(),
        }
    }
}

fn default_etl_interval() -> u64 {
    21_600 // 6 hours
}

fn default_token_yield_lookback() -> u32 {
    30
}

/// HTTP API configuration.
///
/// The response cache is bounded by both entry count and TTL so a long-running
/// process does not grow without limit.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_cache_max_entries() -> u64 {
    1_024
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, with `APR__SECTION__KEY`
/// environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub ethereum: EthereumSettings,
    #[serde(default)]
    pub networks: HashMap<String, NetworkOverride>,
    #[serde(default)]
    pub prices: PriceSettings,
    #[serde(default)]
    pub etl: EtlSettings,
    #[serde(default)]
    pub api: ApiSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("APR").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    /// Override for a network slug, if any was configured.
    pub fn network(&self, slug: &str) -> Option<&NetworkOverride> {
        self.networks.get(slug)
    }
}
