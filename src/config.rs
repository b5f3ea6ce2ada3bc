use core::str::FromStr;
use derive_more::Display;
use std::num::NonZeroUsize;
use thiserror::Error;

/// Fallback worker count when the available parallelism can't be queried.
const DEFAULT_NUM_WORKERS: usize = 16;
const DEFAULT_POOL_CAPACITY: usize = 1024;
const DEFAULT_THREAD_NAME: &str = "dag-engine-worker";

const ENV_ENGINE_TYPE: &str = "DAG_ENGINE_TYPE";
const ENV_NUM_WORKERS: &str = "DAG_ENGINE_NUM_WORKERS";
const ENV_POOL_CAPACITY: &str = "DAG_ENGINE_POOL_CAPACITY";

/// Error produced when an engine configuration value can't be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The value of a configuration key is malformed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Name of the offending key.
        key: &'static str,
        /// Raw value found for the key.
        value: String,
    },
}

/// Engine variant selected at construction time.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Runs every operator synchronously on the submitting thread.
    #[display("naive")]
    Naive,
    /// Dependency-tracked engine backed by a pool of worker threads.
    #[default]
    #[display("threaded")]
    Threaded,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" | "simple" => Ok(Self::Naive),
            "threaded" => Ok(Self::Threaded),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_ENGINE_TYPE,
                value: s.to_owned(),
            }),
        }
    }
}

/// Runtime configuration of an engine.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Which engine variant to build.
    pub kind: EngineKind,
    /// Number of worker threads; `0` means one per available core.
    pub num_workers: usize,
    /// Maximum number of recycled objects kept by each resource pool.
    pub pool_capacity: usize,
    /// Prefix of worker thread names.
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            num_workers: 0,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `DAG_ENGINE_*` environment variables,
    /// falling back to defaults for unset keys.
    ///
    /// # Errors
    /// If a variable is set but can't be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reads keys through `lookup`.
    ///
    /// # Errors
    /// If a value returned by `lookup` can't be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_ENGINE_TYPE) {
            config.kind = value.parse()?;
        }
        if let Some(value) = lookup(ENV_NUM_WORKERS) {
            config.num_workers = parse_usize(ENV_NUM_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_POOL_CAPACITY) {
            config.pool_capacity = parse_usize(ENV_POOL_CAPACITY, &value)?;
        }
        Ok(config)
    }

    /// Set the engine variant.
    pub fn with_kind(mut self, kind: EngineKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the number of worker threads (`0` = auto).
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the per-pool recycling capacity.
    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Number of worker threads to spawn, resolving `0` to the available
    /// parallelism.
    #[must_use]
    pub fn resolved_num_workers(&self) -> usize {
        if self.num_workers == 0 {
            std::thread::available_parallelism().map_or(DEFAULT_NUM_WORKERS, NonZeroUsize::get)
        } else {
            self.num_workers
        }
    }
}

fn parse_usize(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}
