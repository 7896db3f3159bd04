//! Configuration loading and schema definitions for the reporting client.
//!
//! This module provides types and functions for loading client
//! configuration from TOML files or strings. The configuration schema
//! defines the service connection, launch behaviour, log batching, and the
//! execution strategy.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads client configuration from a TOML file.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use rp_client::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("reporting.toml"))?;
/// println!("Project: {}", config.server.project);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads client configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if:
/// - The string contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```
/// use rp_client::config::{ExecutionConfig, load_config_str};
///
/// let config = load_config_str(r#"
///     [server]
///     endpoint = "http://localhost:8080"
///     project = "demo"
///
///     [execution]
///     type = "batched"
///     trigger_count = 4
/// "#)?;
///
/// assert!(matches!(config.execution, ExecutionConfig::Batched(ref b) if b.trigger_count == 4));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LaunchMode;
    use std::io::Write;
    use std::time::Duration;

    const MINIMAL: &str = r#"
        [server]
        endpoint = "http://localhost:8080"
        project = "demo"
    "#;

    #[test]
    fn test_defaults() {
        let config = load_config_str(MINIMAL).unwrap();

        assert_eq!(config.server.api_key, None);
        assert_eq!(config.server.http_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.max_pool_size, 50);
        assert_eq!(config.launch.mode, LaunchMode::Default);
        assert!(config.launch.is_skipped_an_issue);
        assert!(!config.launch.print_uuid);
        assert_eq!(config.batch.max_count, 20);
        assert_eq!(config.batch.max_payload_size, 65_000_000);

        let ExecutionConfig::Immediate(immediate) = config.execution else {
            panic!("default execution must be immediate");
        };
        assert_eq!(immediate.task_timeout(), Duration::from_secs(60));
        assert_eq!(immediate.shutdown_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [server]
            endpoint = "https://reports.example.com"
            project = "Demo"
            api_key = "secret"
            http_timeout_secs = 3

            [launch]
            mode = "debug"
            is_skipped_an_issue = false
            uuid = "existing-launch"

            [batch]
            max_count = 5
            max_payload_size = 1024

            [execution]
            type = "batched"
            trigger_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.server.api_key.as_deref(), Some("secret"));
        assert_eq!(config.launch.mode, LaunchMode::Debug);
        assert!(!config.launch.is_skipped_an_issue);
        assert_eq!(config.launch.uuid.as_deref(), Some("existing-launch"));
        assert_eq!(config.batch.max_count, 5);

        let ExecutionConfig::Batched(batched) = config.execution else {
            panic!("expected batched execution");
        };
        assert_eq!(batched.trigger_count, 10);
        assert_eq!(batched.trigger_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_server_is_rejected() {
        let err = load_config_str("[batch]\nmax_count = 1\n").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_unknown_execution_type_is_rejected() {
        let content = format!("{MINIMAL}\n[execution]\ntype = \"eager\"\n");
        assert!(load_config_str(&content).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.project, "demo");

        let err = load_config(std::path::Path::new("/nonexistent/reporting.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
