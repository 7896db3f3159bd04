//! Configuration schema definitions for the reporting client.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. The execution strategy is selected with a
//! tagged enum, like the rest of the schema's variant choices.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ServerConfig           - Service endpoint, project, credentials, HTTP pool
//! ├── LaunchConfig           - Launch mode and reporting behaviour
//! ├── BatchConfig            - Log batch bounds
//! └── ExecutionConfig        - Tagged enum selecting the execution strategy
//!     ├── Immediate          - Background thread, bounded drain
//!     └── Batched            - Caller thread, count/interval triggers
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batcher::{DEFAULT_BATCH_MAX_COUNT, DEFAULT_BATCH_MAX_PAYLOAD_SIZE};
use crate::model::LaunchMode;
use crate::strategy::batched::{DEFAULT_TRIGGER_COUNT, DEFAULT_TRIGGER_INTERVAL};
use crate::strategy::immediate::{DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TASK_TIMEOUT};
use crate::transport::http::{DEFAULT_HTTP_TIMEOUT, DEFAULT_MAX_POOL_SIZE};

/// Root configuration structure for the reporting client.
///
/// Only `[server]` is required; every other section has defaults.
///
/// # TOML Structure
///
/// ```toml
/// [server]
/// endpoint = "https://reports.example.com"
/// project = "demo"
/// api_key = "secret"
///
/// [launch]
/// mode = "debug"
///
/// [batch]
/// max_count = 50
///
/// [execution]
/// type = "batched"
/// trigger_count = 20
/// ```
///
/// # Example
///
/// ```
/// use rp_client::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [server]
///     endpoint = "http://localhost:8080"
///     project = "demo"
/// "#).unwrap();
/// assert_eq!(config.batch.max_count, 20);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Where and how to reach the collection service.
    pub server: ServerConfig,

    /// Launch settings (optional, has defaults).
    #[serde(default)]
    pub launch: LaunchConfig,

    /// Log batching bounds (optional, has defaults).
    #[serde(default)]
    pub batch: BatchConfig,

    /// Execution strategy for the deferred client (optional, defaults to
    /// immediate).
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Connection settings for the collection service.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `api_key` | None |
/// | `http_timeout_secs` | 10 |
/// | `max_pool_size` | 50 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL of the service, e.g. `https://reports.example.com`.
    pub endpoint: String,

    /// Project name; part of every API path.
    pub project: String,

    /// Bearer token sent with every request.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    ///
    /// Default: 10
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Maximum idle pooled connections kept per host.
    ///
    /// Default: 50
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
}

impl ServerConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT.as_secs()
}

fn default_max_pool_size() -> usize {
    DEFAULT_MAX_POOL_SIZE
}

/// Launch-level reporting behaviour.
///
/// # Example
///
/// ```toml
/// [launch]
/// mode = "debug"
/// is_skipped_an_issue = false
/// print_uuid = true
/// uuid = "6f1c7c4e-2a8f-4d4b-9a57-2b0f6f3e8f11"  # report into an existing launch
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LaunchConfig {
    /// Launch mode. Debug launches are hidden from the main launch list.
    ///
    /// Default: `default`
    #[serde(default)]
    pub mode: LaunchMode,

    /// Whether skipped items are counted as issues.
    ///
    /// When `false`, skipped items without an explicit issue are sent as
    /// `NOT_ISSUE`.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub is_skipped_an_issue: bool,

    /// Print `Launch UUID: <id>` to stdout once the launch starts.
    ///
    /// Default: false
    #[serde(default)]
    pub print_uuid: bool,

    /// Identifier of an existing launch to report into.
    ///
    /// The client then neither starts nor finishes its own launch.
    pub uuid: Option<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            mode: LaunchMode::Default,
            is_skipped_an_issue: true,
            print_uuid: false,
            uuid: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Bounds for log batches.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_count` | 20 |
/// | `max_payload_size` | 65 000 000 bytes |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Records per batch.
    #[serde(default = "default_batch_max_count")]
    pub max_count: usize,

    /// Estimated multipart size per batch, in bytes.
    #[serde(default = "default_batch_max_payload_size")]
    pub max_payload_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_count: default_batch_max_count(),
            max_payload_size: default_batch_max_payload_size(),
        }
    }
}

fn default_batch_max_count() -> usize {
    DEFAULT_BATCH_MAX_COUNT
}

fn default_batch_max_payload_size() -> usize {
    DEFAULT_BATCH_MAX_PAYLOAD_SIZE
}

/// Execution strategy selection.
///
/// # Strategy Types
///
/// | Type | Description | Use Case |
/// |------|-------------|----------|
/// | `immediate` | Units run on a background thread as submitted | Default; lowest latency |
/// | `batched` | Units run on the caller's thread when a trigger fires | No extra thread allowed |
///
/// # Example
///
/// ```toml
/// [execution]
/// type = "immediate"
/// task_timeout_secs = 30
/// shutdown_timeout_secs = 90
///
/// # or
/// [execution]
/// type = "batched"
/// trigger_count = 25
/// trigger_interval_ms = 500
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionConfig {
    /// Run each unit immediately on a background thread.
    Immediate(ImmediateConfig),

    /// Accumulate units and run them on the caller's thread.
    Batched(BatchedConfig),
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::Immediate(ImmediateConfig::default())
    }
}

/// Settings for the immediate strategy.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `task_timeout_secs` | 60 |
/// | `shutdown_timeout_secs` | 120 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImmediateConfig {
    /// How long shutdown waits for any single unit.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Total time shutdown may spend waiting for units.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl ImmediateConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ImmediateConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_task_timeout() -> u64 {
    DEFAULT_TASK_TIMEOUT.as_secs()
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT.as_secs()
}

/// Settings for the batched strategy.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `trigger_count` | 10 |
/// | `trigger_interval_ms` | 1000 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchedConfig {
    /// Queued units that trigger a run.
    #[serde(default = "default_trigger_count")]
    pub trigger_count: usize,

    /// Milliseconds since the last run that trigger a run on the next
    /// submit.
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval_ms: u64,
}

impl BatchedConfig {
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_millis(self.trigger_interval_ms)
    }
}

impl Default for BatchedConfig {
    fn default() -> Self {
        Self {
            trigger_count: default_trigger_count(),
            trigger_interval_ms: default_trigger_interval(),
        }
    }
}

fn default_trigger_count() -> usize {
    DEFAULT_TRIGGER_COUNT
}

fn default_trigger_interval() -> u64 {
    DEFAULT_TRIGGER_INTERVAL.as_millis() as u64
}
