// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Meridian integration engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Meridian configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MeridianConfig {
    /// Server identity and logging.
    #[serde(default)]
    pub server: ServerConfig,

    /// Coordination database settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cluster lease settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Shadow cutover settings.
    #[serde(default)]
    pub shadow: ShadowConfig,

    /// Control-plane HTTP API settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Script sandbox limits.
    #[serde(default)]
    pub script: ScriptConfig,

    /// Deployed channels.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Identity of this engine instance in the cluster. Must be stable across
    /// restarts for lease ownership to survive them.
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            log_level: default_log_level(),
        }
    }
}

fn default_server_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite coordination database shared by cluster members.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("meridian").join("meridian.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("meridian.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Cluster lease configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Run as a cluster member. Clustered channels only poll while holding their lease.
    #[serde(default)]
    pub enabled: bool,

    /// Lease lifetime in seconds. A crashed holder's resources become
    /// acquirable after this long.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Interval between heartbeat renewals. Must be shorter than the TTL.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_ttl_secs: default_lease_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

fn default_lease_ttl_secs() -> u64 {
    30
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

/// Shadow mode configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShadowConfig {
    /// Start with every channel deployed but stopped, awaiting promotion.
    #[serde(default)]
    pub enabled: bool,
}

/// Control-plane HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token required on `/api/*`. `None` rejects every API request.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_gateway_enabled(),
            host: default_gateway_host(),
            port: default_gateway_port(),
            bearer_token: None,
        }
    }
}

fn default_gateway_enabled() -> bool {
    true
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8443
}

/// Script sandbox limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    /// Fuel budget per script run.
    #[serde(default = "default_script_fuel")]
    pub fuel: u64,

    /// Linear memory limit per script run, in megabytes.
    #[serde(default = "default_script_memory_mb")]
    pub memory_mb: u32,

    /// Wall-clock limit per script run, in seconds.
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            fuel: default_script_fuel(),
            memory_mb: default_script_memory_mb(),
            timeout_secs: default_script_timeout_secs(),
        }
    }
}

fn default_script_fuel() -> u64 {
    100_000_000
}

fn default_script_memory_mb() -> u32 {
    64
}

fn default_script_timeout_secs() -> u64 {
    5
}

/// State a channel is left in after deploy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    #[default]
    Started,
    Stopped,
}

/// Which response a channel's source hands back to its dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSelector {
    /// No response.
    #[default]
    None,
    /// A response built from the source connector's outcome.
    AutoAfterSource,
    /// The response of the destination at this metaDataId.
    Destination(u32),
}

/// One deployed channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub id: String,

    pub name: String,

    /// Disabled channels are not deployed.
    #[serde(default = "default_channel_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub initial_state: InitialState,

    /// Poll only while holding the cluster lease for this channel's source.
    #[serde(default)]
    pub clustered: bool,

    #[serde(default)]
    pub response: ResponseSelector,

    pub source: DatabaseSourceConfig,
}

fn default_channel_enabled() -> bool {
    true
}

/// Post-query write behavior of the database connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// No post-query write.
    #[default]
    Never,
    /// After every dispatched row.
    Each,
    /// Exactly once per poll tick.
    Once,
}

/// Database polling source connector settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSourceConfig {
    /// Connection URL: `sqlite://<path>`, `sqlite::memory:`, or a bare file path.
    pub url: String,

    /// SQL statement, or the path of a script module when `use_script` is set.
    pub select: String,

    /// SQL statement or script module path run after dispatch, per `update_mode`.
    #[serde(default)]
    pub update: Option<String>,

    /// Run `select`/`update` as sandboxed scripts instead of plain SQL.
    #[serde(default)]
    pub use_script: bool,

    #[serde(default)]
    pub update_mode: UpdateMode,

    /// Dispatch the whole result set as one message instead of one per row.
    #[serde(default)]
    pub aggregate_results: bool,

    /// Hold one connection across ticks instead of taking one from the pool per tick.
    #[serde(default)]
    pub keep_connection_open: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retries after a failed query attempt. Total attempts are `retry_count + 1`.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl DatabaseSourceConfig {
    /// A declarative SQL source with defaults for everything else.
    pub fn sql(url: impl Into<String>, select: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            select: select.into(),
            update: None,
            use_script: false,
            update_mode: UpdateMode::Never,
            aggregate_results: false,
            keep_connection_open: false,
            poll_interval_ms: default_poll_interval_ms(),
            retry_count: default_retry_count(),
            retry_interval_ms: default_retry_interval_ms(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    10_000
}

fn default_pool_size() -> usize {
    1
}
