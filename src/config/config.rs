use alloy::primitives::Address;
use anyhow::{bail, Context};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::utils::canonical_address;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Contract metadata and volume aggregates
/// - Comments (written by the API, read here)
/// - Sync checkpoints and stream cursors
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

/// Event ingestion configuration.
///
/// Logs are streamed through HyperSync; balance lookups go to `rpc_url`.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    pub chain_id: i64,
    pub hypersync_url: String,
    pub hypersync_bearer_token: String,
    pub rpc_url: String,
    /// Factory contracts allowed to emit `SaleCreated`. Empty accepts any.
    #[serde(default)]
    pub factories: Vec<String>,
    /// First block to index when no checkpoint exists yet.
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_tip_poll_interval")]
    pub tip_poll_interval_milliseconds: u64,
}

fn default_tip_poll_interval() -> u64 {
    200
}

/// Reconciliation engine tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerSettings {
    /// Number of per-address serialized workers.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_shard_queue_capacity")]
    pub shard_queue_capacity: usize,
    /// Interval of the periodic history repair sweep.
    #[serde(default = "default_repair_interval_secs")]
    pub repair_interval_secs: u64,
    /// Also sweep after this many live volume updates (0 disables).
    #[serde(default = "default_repair_every_n_updates")]
    pub repair_every_n_updates: u64,
    #[serde(default = "default_comment_poll_interval_ms")]
    pub comment_poll_interval_ms: u64,
    #[serde(default = "default_comment_batch_size")]
    pub comment_batch_size: i64,
    /// How long a looked-up balance may be reused across rankings. The
    /// default of 0 makes every ranking read live balances.
    #[serde(default = "default_balance_cache_ttl_secs")]
    pub balance_cache_ttl_secs: u64,
}

fn default_shard_count() -> usize {
    8
}

fn default_shard_queue_capacity() -> usize {
    1_024
}

fn default_repair_interval_secs() -> u64 {
    600
}

fn default_repair_every_n_updates() -> u64 {
    500
}

fn default_comment_poll_interval_ms() -> u64 {
    1_000
}

fn default_comment_batch_size() -> i64 {
    500
}

fn default_balance_cache_ttl_secs() -> u64 {
    0
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            shard_queue_capacity: default_shard_queue_capacity(),
            repair_interval_secs: default_repair_interval_secs(),
            repair_every_n_updates: default_repair_every_n_updates(),
            comment_poll_interval_ms: default_comment_poll_interval_ms(),
            comment_batch_size: default_comment_batch_size(),
            balance_cache_ttl_secs: default_balance_cache_ttl_secs(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, with `SALEBOARD__SECTION__KEY`
/// environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("SALEBOARD").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    /// Reject settings the process cannot run with. Called once at startup.
    ///
    /// Normalizes factory addresses to their canonical form on success.
    pub fn validate(mut self) -> anyhow::Result<Self> {
        if self.indexer.hypersync_url.trim().is_empty() {
            bail!("indexer.hypersync_url must be set");
        }
        if self.indexer.hypersync_bearer_token.trim().is_empty() {
            bail!("indexer.hypersync_bearer_token must be set");
        }
        url::Url::parse(&self.indexer.rpc_url).context("indexer.rpc_url is not a valid URL")?;
        if self.reconciler.shard_count == 0 {
            bail!("reconciler.shard_count must be at least 1");
        }
        if self.reconciler.shard_queue_capacity == 0 {
            bail!("reconciler.shard_queue_capacity must be at least 1");
        }
        if self.reconciler.comment_batch_size <= 0 {
            bail!("reconciler.comment_batch_size must be positive");
        }

        let mut factories = Vec::with_capacity(self.indexer.factories.len());
        for raw in &self.indexer.factories {
            let key = canonical_address(raw)
                .with_context(|| format!("indexer.factories contains invalid address {raw:?}"))?;
            if key == crate::utils::address_key(&Address::ZERO) {
                bail!("indexer.factories must not contain the zero address");
            }
            factories.push(key);
        }
        self.indexer.factories = factories;

        Ok(self)
    }
}
