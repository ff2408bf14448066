//! Runtime configuration
//!
//! [`RuntimeConfig`] carries the knobs shared by the executor and the fused
//! subgraph scheduler. Defaults suit most hosts; [`RuntimeConfig::from_env`]
//! applies overrides from the process environment:
//!
//! | Variable                      | Field                 |
//! |-------------------------------|-----------------------|
//! | `GRAPHRT_NUM_THREADS`         | `num_threads`         |
//! | `GRAPHRT_MIN_KERNEL_WORK`     | `min_kernel_work`     |
//! | `GRAPHRT_REUSE_INTERMEDIATES` | `reuse_intermediates` |
//!
//! Unparseable values are ignored with a warning and the default is kept.

use std::env;

/// Environment variable overriding the worker count
pub const ENV_NUM_THREADS: &str = "GRAPHRT_NUM_THREADS";
/// Environment variable overriding the innermost work threshold
pub const ENV_MIN_KERNEL_WORK: &str = "GRAPHRT_MIN_KERNEL_WORK";
/// Environment variable toggling intermediate buffer reuse
pub const ENV_REUSE_INTERMEDIATES: &str = "GRAPHRT_REUSE_INTERMEDIATES";

/// Innermost extent below which the planner collapses dimensions
pub const DEFAULT_MIN_KERNEL_WORK: usize = 256;

/// Configuration shared by [`Executor`](crate::executor::Executor) and
/// [`SubgraphScheduler`](crate::subgraph::SubgraphScheduler)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads for fused subgraphs; `None` uses rayon's default
    pub num_threads: Option<usize>,
    /// Innermost kernel extent the planner tries to reach by collapsing dims
    pub min_kernel_work: usize,
    /// Reuse intermediate buffers of the previous call when shapes match
    pub reuse_intermediates: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            min_kernel_work: DEFAULT_MIN_KERNEL_WORK,
            reuse_intermediates: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `GRAPHRT_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by values from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = lookup_usize(&lookup, ENV_NUM_THREADS) {
            if n > 0 {
                config.num_threads = Some(n);
            } else {
                tracing::warn!("{ENV_NUM_THREADS}=0 ignored");
            }
        }
        if let Some(n) = lookup_usize(&lookup, ENV_MIN_KERNEL_WORK) {
            config.min_kernel_work = n.max(1);
        }
        if let Some(value) = lookup(ENV_REUSE_INTERMEDIATES) {
            if !value.trim().is_empty() {
                config.reuse_intermediates = parse_bool(&value);
            }
        }
        config
    }

    /// Set the worker count
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n.max(1));
        self
    }

    /// Set the innermost work threshold
    pub fn with_min_kernel_work(mut self, n: usize) -> Self {
        self.min_kernel_work = n.max(1);
        self
    }

    /// Enable or disable intermediate buffer reuse
    pub fn with_reuse_intermediates(mut self, enabled: bool) -> Self {
        self.reuse_intermediates = enabled;
        self
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        match self.num_threads {
            Some(n) => n,
            #[cfg(feature = "rayon")]
            None => rayon::current_num_threads(),
            #[cfg(not(feature = "rayon"))]
            None => 1,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn lookup_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_lookup(|_| None);
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.min_kernel_work, 256);
        assert!(config.reuse_intermediates);
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            (ENV_NUM_THREADS, " 3 "),
            (ENV_MIN_KERNEL_WORK, "64"),
            (ENV_REUSE_INTERMEDIATES, "OFF"),
        ]));
        assert_eq!(config.num_threads, Some(3));
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.min_kernel_work, 64);
        assert!(!config.reuse_intermediates);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            (ENV_NUM_THREADS, "lots"),
            (ENV_MIN_KERNEL_WORK, "-1"),
            (ENV_REUSE_INTERMEDIATES, "  "),
        ]));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_parse_bool() {
        for v in ["1", "true", "YES", " on "] {
            assert!(parse_bool(v));
        }
        for v in ["0", "false", "off", "enabled"] {
            assert!(!parse_bool(v));
        }
    }
}
