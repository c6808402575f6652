use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_LOCK_LEASE_SECS, DEFAULT_MAX_REDELIVERIES};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub sled_path: String,
    pub cors_origin: String,
    pub worker: WorkerConfig,
    pub messaging: MessagingConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub is_leader: bool,
    /// Identifies this process in cluster lock records.
    pub instance_id: String,
    pub weighting_cron: String,
    pub chart_cron: String,
    pub outbox_relay_cron: String,
    pub lock_lease_secs: u64,
}

impl WorkerConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }
}

#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub max_redeliveries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_or_parse("HOST", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            port: env_or_parse("PORT", 3000_u16),
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            sled_path: env_or("SLED_PATH", "./data/charts.sled"),
            cors_origin: env_or("CORS_ORIGIN", "http://localhost:5173"),
            worker: WorkerConfig {
                is_leader: env_or_bool("WORKER_LEADER", true),
                instance_id: env::var("INSTANCE_ID")
                    .unwrap_or_else(|_| format!("instance-{}", uuid::Uuid::new_v4().simple())),
                weighting_cron: env_or("WEIGHTING_CRON", "0 0 2 * * *"),
                chart_cron: env_or("CHART_CRON", "0 0 9 * * Tue"),
                outbox_relay_cron: env_or("OUTBOX_RELAY_CRON", "0 * * * * *"),
                lock_lease_secs: env_or_parse("LOCK_LEASE_SECS", DEFAULT_LOCK_LEASE_SECS),
            },
            messaging: MessagingConfig {
                max_redeliveries: env_or_parse("MAX_REDELIVERIES", DEFAULT_MAX_REDELIVERIES),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn managed_keys() -> &'static [&'static str] {
        &[
            "HOST",
            "PORT",
            "RUST_LOG",
            "WORKER_LEADER",
            "INSTANCE_ID",
            "LOCK_LEASE_SECS",
            "MAX_REDELIVERIES",
            "CHART_CRON",
        ]
    }

    fn clear_keys(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    fn loads_defaults_when_missing() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.worker.lock_lease(), Duration::from_secs(300));
        assert_eq!(cfg.messaging.max_redeliveries, 10);
        assert_eq!(cfg.worker.chart_cron, "0 0 9 * * Tue");
        assert!(cfg.worker.instance_id.starts_with("instance-"));
    }

    #[test]
    fn parses_numeric_values() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("PORT", "4000");
        env::set_var("LOCK_LEASE_SECS", "60");
        env::set_var("MAX_REDELIVERIES", "3");

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.worker.lock_lease_secs, 60);
        assert_eq!(cfg.messaging.max_redeliveries, 3);
        clear_keys(managed_keys());
    }

    #[test]
    fn invalid_values_fall_back() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("PORT", "bad");
        env::set_var("MAX_REDELIVERIES", "-1");
        env::set_var("WORKER_LEADER", "maybe");

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.messaging.max_redeliveries, 10);
        assert!(cfg.worker.is_leader);
        clear_keys(managed_keys());
    }

    #[test]
    fn explicit_instance_id_is_kept() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("INSTANCE_ID", "node-a");
        assert_eq!(Config::from_env().worker.instance_id, "node-a");
        clear_keys(managed_keys());
    }
}
