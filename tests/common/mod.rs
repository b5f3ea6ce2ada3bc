#![allow(dead_code)]

use dag_engine::{EngineConfig, ThreadedEngine};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Upper bound for anything a test waits on that should happen promptly.
pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn threaded(num_workers: usize) -> ThreadedEngine {
    init_tracing();
    ThreadedEngine::new(
        &EngineConfig::default()
            .with_num_workers(num_workers)
            .with_thread_name("test-worker"),
    )
    .expect("engine must start")
}
