//! Configuration Module
//!
//! Handles loading the sweeper runtime configuration from environment variables.

use std::env;

/// Sweeper runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worker threads driving the expiration timers
    pub sweeper_threads: usize,
    /// Blocking-pool threads executing sweeps and their callbacks
    pub sweeper_blocking_threads: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_SWEEPER_THREADS` - Timer worker threads (default: 1)
    /// - `CACHE_SWEEPER_BLOCKING_THREADS` - Sweep executor threads (default: 4)
    ///
    /// Unparsable or zero values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweeper_threads: positive_from_env("CACHE_SWEEPER_THREADS")
                .unwrap_or(defaults.sweeper_threads),
            sweeper_blocking_threads: positive_from_env("CACHE_SWEEPER_BLOCKING_THREADS")
                .unwrap_or(defaults.sweeper_blocking_threads),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sweeper_threads: 1,
            sweeper_blocking_threads: 4,
        }
    }
}

fn positive_from_env(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|v: &usize| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sweeper_threads, 1);
        assert_eq!(config.sweeper_blocking_threads, 4);
    }

    #[test]
    fn test_config_from_env_overrides_and_fallbacks() {
        env::set_var("CACHE_SWEEPER_THREADS", "3");
        env::set_var("CACHE_SWEEPER_BLOCKING_THREADS", "0");

        let config = Config::from_env();
        assert_eq!(config.sweeper_threads, 3);
        // Zero is rejected
        assert_eq!(config.sweeper_blocking_threads, 4);

        env::set_var("CACHE_SWEEPER_THREADS", "not-a-number");
        env::remove_var("CACHE_SWEEPER_BLOCKING_THREADS");

        let config = Config::from_env();
        assert_eq!(config, Config::default());

        env::remove_var("CACHE_SWEEPER_THREADS");
    }
}
