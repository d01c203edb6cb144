use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use doculab_pipeline::{PipelineConfig, ToolkitLayout};

use crate::background::retention::RetentionSettings;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults matching the container layout the conversion
/// toolkit ships in. Override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    /// A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// How long shutdown waits for in-flight jobs (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// How long finished job records stay pollable (default: `86400`).
    pub ledger_retention_secs: u64,
    /// Period of the retention sweep (default: `300`).
    pub retention_interval_secs: u64,
    /// Per-job log buffer (default: `1024`).
    pub log_channel_capacity: usize,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                                   |
    /// |--------------------------|-------------------------------------------|
    /// | `HOST`                   | `0.0.0.0`                                 |
    /// | `PORT`                   | `8000`                                    |
    /// | `CORS_ORIGINS`           | `http://localhost:3000`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`                                      |
    /// | `TOOLKIT_DIR`            | `/app`                                    |
    /// | `TOOLKIT_ENTRYPOINT`     | `all-formats-from-gsheet.sh`              |
    /// | `TOOLKIT_COMPONENTS`     | `gsheet-to-json,json-to-odt,json-to-docx` |
    /// | `WORK_ROOT`              | `/app`                                    |
    /// | `OUTPUT_DIR`             | `out`                                     |
    /// | `OUTPUT_PUBLIC_PREFIX`   | `out`                                     |
    /// | `LOCK_TTL_SECS`          | `3600`                                    |
    /// | `LEDGER_RETENTION_SECS`  | `86400`                                   |
    /// | `RETENTION_INTERVAL_SECS`| `300`                                     |
    /// | `MAX_CONCURRENT_JOBS`    | `4`                                       |
    /// | `QUEUE_CAPACITY`         | `256`                                     |
    /// | `LOG_CHANNEL_CAPACITY`   | `1024`                                    |
    ///
    /// Panics on unparsable values, and if `LEDGER_RETENTION_SECS` is
    /// shorter than `LOCK_TTL_SECS` (a live lock must never point at a purged
    /// record).
    pub fn from_env() -> Self {
        let host = env_or("HOST", "0.0.0.0");
        let port: u16 = parse_env("PORT", "8000");
        let cors_origins = split_list(&env_or("CORS_ORIGINS", "http://localhost:3000"));
        let shutdown_timeout_secs: u64 = parse_env("SHUTDOWN_TIMEOUT_SECS", "30");

        let toolkit = ToolkitLayout {
            root: PathBuf::from(env_or("TOOLKIT_DIR", "/app")),
            entrypoint: env_or("TOOLKIT_ENTRYPOINT", "all-formats-from-gsheet.sh"),
            components: split_list(&env_or(
                "TOOLKIT_COMPONENTS",
                "gsheet-to-json,json-to-odt,json-to-docx",
            )),
        };

        let lock_ttl_secs: u64 = parse_env("LOCK_TTL_SECS", "3600");
        let ledger_retention_secs: u64 = parse_env("LEDGER_RETENTION_SECS", "86400");
        assert!(
            ledger_retention_secs >= lock_ttl_secs,
            "LEDGER_RETENTION_SECS ({ledger_retention_secs}) must be >= LOCK_TTL_SECS ({lock_ttl_secs})"
        );

        let pipeline = PipelineConfig {
            toolkit,
            work_root: PathBuf::from(env_or("WORK_ROOT", "/app")),
            output_dir: PathBuf::from(env_or("OUTPUT_DIR", "out")),
            output_public_prefix: env_or("OUTPUT_PUBLIC_PREFIX", "out"),
            lock_ttl: Duration::from_secs(lock_ttl_secs),
            max_concurrent_jobs: parse_env("MAX_CONCURRENT_JOBS", "4"),
            queue_capacity: parse_env("QUEUE_CAPACITY", "256"),
        };

        Self {
            host,
            port,
            cors_origins,
            shutdown_timeout_secs,
            ledger_retention_secs,
            retention_interval_secs: parse_env("RETENTION_INTERVAL_SECS", "300"),
            log_channel_capacity: parse_env("LOG_CHANNEL_CAPACITY", "1024"),
            pipeline,
        }
    }

    /// Whether any origin may call the API.
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }

    pub fn retention_settings(&self) -> RetentionSettings {
        RetentionSettings {
            interval: Duration::from_secs(self.retention_interval_secs.max(1)),
            ledger_retention: Duration::from_secs(self.ledger_retention_secs),
            channel_idle: Duration::from_secs(self.retention_interval_secs.max(1)),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_env<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_or(name, default);
    raw.trim()
        .parse()
        .unwrap_or_else(|e| panic!("{name} must be valid, got '{raw}': {e}"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_empty_entries() {
        assert_eq!(
            split_list(" gsheet-to-json, json-to-odt ,,json-to-docx "),
            vec!["gsheet-to-json", "json-to-odt", "json-to-docx"]
        );
        assert!(split_list("").is_empty());
    }
}
