//! Engine configuration: pool sizing, default retry policy, and the
//! run-wide deadline, loaded the way the rest of the workspace loads
//! configuration — via `tooling`'s `ConfigBuilder`.

use std::time::Duration;

use tooling::config::ConfigBuilder;
use tooling::async_utils::retry::RetryPolicy;

/// Knobs the Scheduler and Executor Pools read at run start. Cloned once per
/// run; nothing here changes mid-run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently in-flight `IoBound`/`Remote` invocations.
    pub io_pool_concurrency: usize,
    /// Fixed worker-thread count backing the `CpuBound` pool.
    pub cpu_pool_workers: usize,
    /// Backoff policy applied to any node that does not already carry its
    /// own retry budget from the source (every node does, but this is the
    /// shape of the delay between attempts, not the attempt count).
    pub default_retry_policy: RetryPolicy,
    /// Wall-clock budget for an entire run. `None` means no deadline.
    pub run_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_pool_concurrency: 64,
            cpu_pool_workers: num_cpus_hint(),
            default_retry_policy: RetryPolicy::new(1),
            run_deadline: None,
        }
    }
}

/// `num_cpus` isn't in the dependency set; available-parallelism with a
/// conservative fallback covers the same case when the environment
/// doesn't say otherwise.
fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl ConfigBuilder for EngineConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.io_pool_concurrency == 0 {
            return Err(tooling::ToolingError::General("io_pool_concurrency must be at least 1".into()));
        }
        if self.cpu_pool_workers == 0 {
            return Err(tooling::ToolingError::General("cpu_pool_workers must be at least 1".into()));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> tooling::Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var(format!("{prefix}IO_POOL_CONCURRENCY")) {
            config.io_pool_concurrency = v
                .parse()
                .map_err(|_| tooling::ToolingError::General(format!("{prefix}IO_POOL_CONCURRENCY must be a positive integer")))?;
        }
        if let Ok(v) = std::env::var(format!("{prefix}CPU_POOL_WORKERS")) {
            config.cpu_pool_workers = v
                .parse()
                .map_err(|_| tooling::ToolingError::General(format!("{prefix}CPU_POOL_WORKERS must be a positive integer")))?;
        }
        if let Ok(v) = std::env::var(format!("{prefix}RUN_DEADLINE_SECS")) {
            let secs: u64 = v
                .parse()
                .map_err(|_| tooling::ToolingError::General(format!("{prefix}RUN_DEADLINE_SECS must be an integer")))?;
            config.run_deadline = Some(Duration::from_secs(secs));
        }
        if let Ok(v) = std::env::var(format!("{prefix}RETRY_MAX_ATTEMPTS")) {
            config.default_retry_policy.max_attempts = v
                .parse()
                .map_err(|_| tooling::ToolingError::General(format!("{prefix}RETRY_MAX_ATTEMPTS must be a positive integer")))?;
        }

        Ok(config)
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        self.io_pool_concurrency = other.io_pool_concurrency;
        self.cpu_pool_workers = other.cpu_pool_workers;
        self.default_retry_policy = other.default_retry_policy;
        if other.run_deadline.is_some() {
            self.run_deadline = other.run_deadline;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = EngineConfig::default();
        config.io_pool_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_env_reads_deadline_seconds() {
        std::env::set_var("POINTY_TEST_RUN_DEADLINE_SECS", "30");
        let config = EngineConfig::from_env("POINTY_TEST_").unwrap();
        assert_eq!(config.run_deadline, Some(Duration::from_secs(30)));
        std::env::remove_var("POINTY_TEST_RUN_DEADLINE_SECS");
    }
}
