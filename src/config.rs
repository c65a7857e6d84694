use std::fs;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::saga::WorkerConfig;
use crate::transfer::{LockMode, RetryPolicy};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Extra filter directives, e.g. `fund_transfer::saga=debug`
    #[serde(default)]
    pub log_targets: Vec<String>,
    /// PostgreSQL connection URL; in-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub saga: SagaConfig,
}

/// Direct transfer path
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TransferConfig {
    pub lock_mode: LockMode,
    pub retry: RetryPolicy,
    /// Delay before the logging notifier reports delivery
    pub notification_delay_ms: u64,
}

/// Event-sourced transfer saga
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SagaConfig {
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
    /// Capacity of the account command channel
    pub command_buffer: usize,
    /// Let recovery re-send compensations stuck in COMPENSATING
    pub retry_compensation: bool,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
            command_buffer: 1024,
            retry_compensation: false,
        }
    }
}

impl SagaConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
            batch_size: self.batch_size,
        }
    }
}

const DEFAULT_ENV: &str = "dev";

/// Environment named by `--env <name>` or `-e <name>`, `dev` otherwise
pub fn env_from_args<I>(args: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--env" || arg == "-e" {
            if let Some(env) = args.next() {
                return env;
            }
        }
    }
    DEFAULT_ENV.to_string()
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: fund_transfer.log
use_json: false
rotation: daily
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.postgres_url, None);
        assert_eq!(config.transfer.lock_mode, LockMode::Pessimistic);
        assert_eq!(config.transfer.retry.max_attempts, 1);
        assert_eq!(config.saga.stale_threshold_secs, 60);
        assert!(!config.saga.retry_compensation);
    }

    #[test]
    fn test_transfer_section() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
transfer:
  lock_mode: optimistic
  retry:
    max_attempts: 3
saga:
  scan_interval_secs: 5
"#
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.transfer.lock_mode, LockMode::Optimistic);
        assert_eq!(config.transfer.retry.max_attempts, 3);
        // unspecified field keeps its default
        assert_eq!(config.transfer.retry.backoff_ms, 10);
        assert_eq!(config.saga.worker_config().scan_interval, Duration::from_secs(5));
        assert_eq!(config.saga.batch_size, 100);
    }

    #[test]
    fn test_unknown_lock_mode_rejected() {
        let yaml = format!("{}transfer:\n  lock_mode: eventual\n", MINIMAL);
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_env_from_args() {
        assert_eq!(env_from_args(args(&["fund_transfer"])), "dev");
        assert_eq!(env_from_args(args(&["fund_transfer", "--env", "ci"])), "ci");
        assert_eq!(env_from_args(args(&["fund_transfer", "-e", "prod"])), "prod");
        // Dangling flag falls back to the default
        assert_eq!(env_from_args(args(&["fund_transfer", "-e"])), "dev");
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::load("does-not-exist").is_err());
    }
}
