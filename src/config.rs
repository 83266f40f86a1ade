//! Engine configuration
//!
//! All knobs are read once at startup from the environment and carried in
//! an owned struct; nothing in the engine reads ambient state afterwards.

use std::time::Duration;

use tracing::warn;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock time limit per test-case run in milliseconds
    pub timeout_ms: u32,
    /// Memory ceiling per test-case run in MB
    pub memory_limit_mb: u32,
    /// Whether sandbox admission control is active
    pub pooling_enabled: bool,
    /// Maximum number of concurrent sandbox leases
    pub max_pool_size: usize,
    /// How long a caller may wait for a free sandbox slot
    pub acquire_timeout: Duration,
    /// Lease age after which the reclaimer force-releases it
    pub lease_ttl: Duration,
    /// Interval between reclaim sweeps
    pub reclaim_interval: Duration,
    /// Compile time limit in milliseconds
    pub compile_time_limit_ms: u32,
    /// Compile memory limit in MB
    pub compile_memory_limit_mb: u32,
    /// Bounded retry attempts for transient sandbox failures
    pub retry_max_attempts: u32,
    /// Initial backoff delay
    pub retry_base_delay: Duration,
    /// Backoff delay ceiling
    pub retry_max_delay: Duration,
    /// HTTP listen address
    pub listen_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            memory_limit_mb: 128,
            pooling_enabled: true,
            max_pool_size: 3,
            acquire_timeout: Duration::from_millis(10_000),
            lease_ttl: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(10),
            compile_time_limit_ms: 30_000,
            compile_memory_limit_mb: 512,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_millis(2_000),
            listen_addr: "0.0.0.0:8080".into(),
        }
    }
}

impl EngineConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            timeout_ms: env_parse("GRADER_TIMEOUT_MS", defaults.timeout_ms),
            memory_limit_mb: env_memory_mb("GRADER_MEMORY_LIMIT", defaults.memory_limit_mb),
            pooling_enabled: env_bool("GRADER_POOLING_ENABLED", defaults.pooling_enabled),
            max_pool_size: env_parse("GRADER_MAX_POOL_SIZE", defaults.max_pool_size).max(1),
            acquire_timeout: Duration::from_millis(env_parse(
                "GRADER_ACQUIRE_TIMEOUT_MS",
                defaults.acquire_timeout.as_millis() as u64,
            )),
            lease_ttl: Duration::from_secs(env_parse(
                "GRADER_LEASE_TTL_SECS",
                defaults.lease_ttl.as_secs(),
            )),
            reclaim_interval: Duration::from_secs(env_parse(
                "GRADER_RECLAIM_INTERVAL_SECS",
                defaults.reclaim_interval.as_secs(),
            )),
            compile_time_limit_ms: env_parse(
                "GRADER_COMPILE_TIME_LIMIT_MS",
                defaults.compile_time_limit_ms,
            ),
            compile_memory_limit_mb: env_parse(
                "GRADER_COMPILE_MEMORY_LIMIT_MB",
                defaults.compile_memory_limit_mb,
            ),
            retry_max_attempts: env_parse("GRADER_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay: Duration::from_millis(env_parse(
                "GRADER_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )),
            retry_max_delay: Duration::from_millis(env_parse(
                "GRADER_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )),
            listen_addr: std::env::var("GRADER_LISTEN_ADDR")
                .unwrap_or_else(|_| defaults.listen_addr),
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Parse a memory limit that may carry an "m"/"mb" suffix ("128m" -> 128).
fn env_memory_mb(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(raw) => {
            let digits = raw
                .trim()
                .trim_end_matches(|c: char| c.is_ascii_alphabetic());
            digits.parse().unwrap_or_else(|_| {
                warn!("Invalid memory limit {}: {:?}, using default", key, raw);
                default
            })
        }
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.memory_limit_mb, 128);
        assert_eq!(config.max_pool_size, 3);
        assert!(config.pooling_enabled);
    }

    #[test]
    fn test_memory_suffix_parsing() {
        std::env::set_var("GRADER_TEST_MEM_A", "256m");
        assert_eq!(env_memory_mb("GRADER_TEST_MEM_A", 128), 256);
        std::env::set_var("GRADER_TEST_MEM_B", "64");
        assert_eq!(env_memory_mb("GRADER_TEST_MEM_B", 128), 64);
        std::env::set_var("GRADER_TEST_MEM_C", "garbage");
        assert_eq!(env_memory_mb("GRADER_TEST_MEM_C", 128), 128);
    }
}
