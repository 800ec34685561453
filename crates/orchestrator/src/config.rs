//! Orchestrator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields (the database URL) are redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default health loop cadence in milliseconds (§4.6).
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

/// Default heartbeat staleness threshold in milliseconds (§4.6).
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 60_000;

/// Default metrics aggregator cadence in milliseconds (§4.7).
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 15_000;

/// Default per-node concurrency cap, combined with the derived capacity via `min` (§6).
pub const DEFAULT_MAX_CONCURRENT_PER_NODE: u32 = 6;

/// Default minimum nodes for auto-scaling advisories.
pub const DEFAULT_AUTO_SCALE_MIN_NODES: u32 = 1;

/// Default maximum nodes for auto-scaling advisories.
pub const DEFAULT_AUTO_SCALE_MAX_NODES: u32 = 50;

/// Default scale-up load threshold (fraction of capacity).
pub const DEFAULT_SCALE_UP_THRESHOLD: f64 = 0.80;

/// Default scale-down load threshold (fraction of capacity).
pub const DEFAULT_SCALE_DOWN_THRESHOLD: f64 = 0.20;

/// Default auto-scaling cooldown in milliseconds.
pub const DEFAULT_AUTO_SCALE_COOLDOWN_MS: u64 = 300_000;

/// Default minimum pooled database connections (§5).
pub const DEFAULT_DB_POOL_MIN: u32 = 2;

/// Default maximum pooled database connections (§5).
pub const DEFAULT_DB_POOL_MAX: u32 = 10;

/// Default cadence (in Health Loop ticks) between `sweep_stale` passes (SPEC_FULL §F.5).
pub const DEFAULT_SWEEP_STALE_EVERY_N_TICKS: u32 = 20;

/// Default staleness horizon before a node is removed outright, in milliseconds (SPEC_FULL §F.5).
pub const DEFAULT_STALE_REMOVAL_HORIZON_MS: u64 = 3_600_000;

/// Orchestrator configuration, loaded from environment variables with
/// sensible defaults. Database URL is redacted in Debug output to prevent
/// credential leakage.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL for the Repository (C1).
    pub database_url: String,

    /// Bind address for the ambient `/health`, `/ready`, `/metrics` server.
    pub bind_address: String,

    /// Deployment region identifier for this orchestrator instance.
    pub region: String,

    /// Base URL recorders use to call back with job status updates (§4.5 step 3).
    pub callback_base_url: String,

    /// Health Loop cadence (§4.6).
    pub health_check_interval_ms: u64,

    /// Heartbeat staleness threshold (§4.6, §4.2).
    pub node_timeout_ms: u64,

    /// Metrics Aggregator cadence (§4.7).
    pub metrics_interval_ms: u64,

    /// Hard cap on recorder load, combined with the derived formula via `min` (§6).
    pub max_concurrent_per_node: u32,

    /// Auto-scaling advisory bounds and thresholds (§4.7, advisory only).
    pub auto_scale_min_nodes: u32,
    pub auto_scale_max_nodes: u32,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub auto_scale_cooldown_ms: u64,

    /// Minimum and maximum pooled database connections (§5).
    pub db_pool_min: u32,
    pub db_pool_max: u32,

    /// Health Loop ticks between `sweep_stale` passes (SPEC_FULL §F.5).
    pub sweep_stale_every_n_ticks: u32,

    /// Staleness horizon before a node is removed outright (SPEC_FULL §F.5).
    pub stale_removal_horizon_ms: u64,
}

/// Custom Debug implementation that redacts the database URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("region", &self.region)
            .field("callback_base_url", &self.callback_base_url)
            .field("health_check_interval_ms", &self.health_check_interval_ms)
            .field("node_timeout_ms", &self.node_timeout_ms)
            .field("metrics_interval_ms", &self.metrics_interval_ms)
            .field("max_concurrent_per_node", &self.max_concurrent_per_node)
            .field("auto_scale_min_nodes", &self.auto_scale_min_nodes)
            .field("auto_scale_max_nodes", &self.auto_scale_max_nodes)
            .field("scale_up_threshold", &self.scale_up_threshold)
            .field("scale_down_threshold", &self.scale_down_threshold)
            .field("auto_scale_cooldown_ms", &self.auto_scale_cooldown_ms)
            .field("db_pool_min", &self.db_pool_min)
            .field("db_pool_max", &self.db_pool_max)
            .field("sweep_stale_every_n_ticks", &self.sweep_stale_every_n_ticks)
            .field("stale_removal_horizon_ms", &self.stale_removal_horizon_ms)
            .finish()
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration for {0}: {1}")]
    Invalid(String, String),
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let region = vars
            .get("REGION")
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string());

        let callback_base_url = vars
            .get("CALLBACK_BASE_URL")
            .cloned()
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let health_check_interval_ms = parse_u64(
            vars,
            "HEALTH_CHECK_INTERVAL_MS",
            DEFAULT_HEALTH_CHECK_INTERVAL_MS,
        )?;
        let node_timeout_ms = parse_u64(vars, "NODE_TIMEOUT_MS", DEFAULT_NODE_TIMEOUT_MS)?;
        let metrics_interval_ms =
            parse_u64(vars, "METRICS_INTERVAL_MS", DEFAULT_METRICS_INTERVAL_MS)?;
        let max_concurrent_per_node = parse_u32(
            vars,
            "MAX_CONCURRENT_PER_NODE",
            DEFAULT_MAX_CONCURRENT_PER_NODE,
        )?;
        let auto_scale_min_nodes = parse_u32(
            vars,
            "AUTO_SCALE_MIN_NODES",
            DEFAULT_AUTO_SCALE_MIN_NODES,
        )?;
        let auto_scale_max_nodes = parse_u32(
            vars,
            "AUTO_SCALE_MAX_NODES",
            DEFAULT_AUTO_SCALE_MAX_NODES,
        )?;
        let scale_up_threshold = parse_f64(
            vars,
            "AUTO_SCALE_UP_THRESHOLD",
            DEFAULT_SCALE_UP_THRESHOLD,
        )?;
        let scale_down_threshold = parse_f64(
            vars,
            "AUTO_SCALE_DOWN_THRESHOLD",
            DEFAULT_SCALE_DOWN_THRESHOLD,
        )?;
        let auto_scale_cooldown_ms = parse_u64(
            vars,
            "AUTO_SCALE_COOLDOWN_MS",
            DEFAULT_AUTO_SCALE_COOLDOWN_MS,
        )?;
        let db_pool_min = parse_u32(vars, "DB_POOL_MIN", DEFAULT_DB_POOL_MIN)?;
        let db_pool_max = parse_u32(vars, "DB_POOL_MAX", DEFAULT_DB_POOL_MAX)?;
        let sweep_stale_every_n_ticks = parse_u32(
            vars,
            "SWEEP_STALE_EVERY_N_TICKS",
            DEFAULT_SWEEP_STALE_EVERY_N_TICKS,
        )?;
        let stale_removal_horizon_ms = parse_u64(
            vars,
            "STALE_REMOVAL_HORIZON_MS",
            DEFAULT_STALE_REMOVAL_HORIZON_MS,
        )?;

        if db_pool_min > db_pool_max {
            return Err(ConfigError::Invalid(
                "DB_POOL_MIN".to_string(),
                format!("must not exceed DB_POOL_MAX ({db_pool_min} > {db_pool_max})"),
            ));
        }
        if auto_scale_min_nodes > auto_scale_max_nodes {
            return Err(ConfigError::Invalid(
                "AUTO_SCALE_MIN_NODES".to_string(),
                format!(
                    "must not exceed AUTO_SCALE_MAX_NODES ({auto_scale_min_nodes} > {auto_scale_max_nodes})"
                ),
            ));
        }

        Ok(Config {
            database_url,
            bind_address,
            region,
            callback_base_url,
            health_check_interval_ms,
            node_timeout_ms,
            metrics_interval_ms,
            max_concurrent_per_node,
            auto_scale_min_nodes,
            auto_scale_max_nodes,
            scale_up_threshold,
            scale_down_threshold,
            auto_scale_cooldown_ms,
            db_pool_min,
            db_pool_max,
            sweep_stale_every_n_ticks,
            stale_removal_horizon_ms,
        })
    }
}

fn parse_u64(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(key) {
        Some(v) => v
            .parse()
            .map_err(|e| ConfigError::Invalid(key.to_string(), format!("{e}"))),
        None => Ok(default),
    }
}

fn parse_u32(vars: &HashMap<String, String>, key: &str, default: u32) -> Result<u32, ConfigError> {
    match vars.get(key) {
        Some(v) => v
            .parse()
            .map_err(|e| ConfigError::Invalid(key.to_string(), format!("{e}"))),
        None => Ok(default),
    }
}

fn parse_f64(vars: &HashMap<String, String>, key: &str, default: f64) -> Result<f64, ConfigError> {
    match vars.get(key) {
        Some(v) => v
            .parse()
            .map_err(|e| ConfigError::Invalid(key.to_string(), format!("{e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "DATABASE_URL".to_string(),
            "postgresql://localhost/orchestrator_test".to_string(),
        )])
    }

    #[test]
    fn defaults_applied_when_unset() {
        let config = Config::from_vars(&base_vars()).expect("should load");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.callback_base_url, "http://localhost:8080");
        assert_eq!(
            config.health_check_interval_ms,
            DEFAULT_HEALTH_CHECK_INTERVAL_MS
        );
        assert_eq!(config.node_timeout_ms, DEFAULT_NODE_TIMEOUT_MS);
        assert_eq!(config.max_concurrent_per_node, DEFAULT_MAX_CONCURRENT_PER_NODE);
        assert_eq!(config.db_pool_min, DEFAULT_DB_POOL_MIN);
        assert_eq!(config.db_pool_max, DEFAULT_DB_POOL_MAX);
        assert_eq!(
            config.sweep_stale_every_n_ticks,
            DEFAULT_SWEEP_STALE_EVERY_N_TICKS
        );
        assert_eq!(
            config.stale_removal_horizon_ms,
            DEFAULT_STALE_REMOVAL_HORIZON_MS
        );
    }

    #[test]
    fn custom_values_override_defaults() {
        let mut vars = base_vars();
        vars.insert("NODE_TIMEOUT_MS".to_string(), "90000".to_string());
        vars.insert("MAX_CONCURRENT_PER_NODE".to_string(), "4".to_string());

        let config = Config::from_vars(&vars).expect("should load");
        assert_eq!(config.node_timeout_ms, 90_000);
        assert_eq!(config.max_concurrent_per_node, 4);
    }

    #[test]
    fn missing_database_url_errors() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn pool_min_exceeding_max_is_rejected() {
        let mut vars = base_vars();
        vars.insert("DB_POOL_MIN".to_string(), "20".to_string());
        vars.insert("DB_POOL_MAX".to_string(), "10".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::Invalid(k, _)) if k == "DB_POOL_MIN"));
    }

    #[test]
    fn debug_redacts_database_url() {
        let config = Config::from_vars(&base_vars()).expect("should load");
        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("postgresql://"));
    }
}
