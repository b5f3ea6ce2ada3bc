mod execute;
mod naive;
pub(crate) mod threaded;

pub use crate::engine::{
    naive::NaiveEngine,
    threaded::{EngineStats, ThreadedEngine},
};
use crate::{
    config::{ConfigError, EngineConfig, EngineKind},
    types::{AsyncFn, Context, DeleteFn, OprHandle, SharedAsyncFn, SyncFn, VarHandle},
};
use thiserror::Error;

/// Error returned when an engine can't be constructed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread {index}")]
    WorkerSpawn {
        /// Index of the worker that couldn't be started.
        index: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The engine configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Sequencing engine for operators that read and mutate variables.
///
/// For every variable, accesses are granted in submission order. Reads of a
/// variable may overlap each other; a write excludes every other access to
/// the same variable. Operators touching disjoint variables are unordered.
///
/// Misuse (touching a deleted variable, pushing an asynchronous operator to
/// the [`NaiveEngine`], dropping a [`Completion`](crate::Completion) without
/// signaling it) panics.
///
/// Blocking on [`Engine::wait_for_var`] or [`Engine::wait_for_all`] from
/// inside an operator body can deadlock and is not detected.
pub trait Engine: Send + Sync {
    /// Allocate a fresh variable with no pending access.
    fn new_var(&self) -> VarHandle;

    /// Create a reusable operator that reads `use_vars` and mutates
    /// `mutate_vars`. A variable listed in both sets is treated as mutated.
    /// Nothing is scheduled until the operator is pushed.
    fn new_operator(
        &self,
        body: SharedAsyncFn,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    ) -> OprHandle;

    /// Drop a reusable operator. Runs already pushed are not affected.
    fn delete_operator(&self, opr: OprHandle);

    /// Schedule one run of a reusable operator.
    fn push(&self, opr: OprHandle, ctx: Context);

    /// Schedule a one-shot asynchronous body.
    fn push_async(
        &self,
        body: AsyncFn,
        ctx: Context,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    );

    /// Schedule a one-shot synchronous body whose completion is signaled as
    /// soon as it returns.
    fn push_sync(
        &self,
        body: SyncFn,
        ctx: Context,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    ) {
        self.push_async(
            Box::new(move |rctx, done| {
                body(rctx);
                done.complete();
            }),
            ctx,
            use_vars,
            mutate_vars,
        );
    }

    /// Schedule `delete_fn` after every access already pushed on `var`, then
    /// release the variable. The handle is invalid as soon as this returns.
    fn push_delete(&self, delete_fn: DeleteFn, ctx: Context, var: VarHandle);

    /// Block until every access pushed so far on `var` has completed.
    fn wait_for_var(&self, var: VarHandle);

    /// Block until every operator pushed so far has completed.
    fn wait_for_all(&self);
}

/// Construct the engine variant selected by `config`.
///
/// # Errors
/// If a worker thread of the threaded engine can't be spawned.
pub fn create_engine(config: &EngineConfig) -> Result<Box<dyn Engine>, EngineError> {
    Ok(match config.kind {
        EngineKind::Naive => Box::new(NaiveEngine::new()),
        EngineKind::Threaded => Box::new(ThreadedEngine::new(config)?),
    })
}

/// Construct an engine configured from `DAG_ENGINE_*` environment variables.
///
/// # Errors
/// If the environment holds an invalid value or a worker can't be spawned.
pub fn create_engine_from_env() -> Result<Box<dyn Engine>, EngineError> {
    create_engine(&EngineConfig::from_env()?)
}
