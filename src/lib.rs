//! Dependency-tracked asynchronous operator engine.
//!
//! Clients push operators tagged with the variables they read and the
//! variables they mutate. The engine guarantees that:
//! - per variable, accesses are granted strictly in submission order;
//! - reads of a variable may run concurrently with each other;
//! - a write runs exclusively with respect to every other access to the same
//!   variable;
//! - operators touching disjoint variables are scheduled independently.
//!
//! The engine never looks inside an operator body. It only sequences it and
//! waits for the body to signal its [`Completion`], which may happen on any
//! thread (e.g. one that observes device work finishing).
//!
//! Key modules:
//! - `engine`: the [`Engine`] interface and its two variants,
//!   [`ThreadedEngine`] (worker pool with per-variable FIFOs) and
//!   [`NaiveEngine`] (synchronous, submission order, used as an oracle).
//! - `config`: [`EngineConfig`], with defaults and `DAG_ENGINE_*` environment
//!   overrides.
//! - `types`: handles, device contexts and body signatures.
//!
//! Quick start:
//! 1. Build an engine with [`create_engine`] or [`ThreadedEngine::new`].
//! 2. Allocate variables with [`Engine::new_var`].
//! 3. Push work with [`Engine::push_sync`] / [`Engine::push_async`], or
//!    create a reusable operator with [`Engine::new_operator`] and
//!    [`Engine::push`] it.
//! 4. Block with [`Engine::wait_for_var`] or [`Engine::wait_for_all`], and
//!    release variables with [`Engine::push_delete`].

/// Engine configuration.
///
/// Exposes [`EngineConfig`], the [`EngineKind`] selector and the errors
/// produced while reading them from the environment.
pub mod config;
/// The engine interface and its variants.
///
/// Contains submission, completion propagation through per-variable FIFOs,
/// the worker pool and the synchronous reference engine.
pub mod engine;
mod operator;
mod pool;
mod queue;
mod sync;
/// Handles, device contexts and operator body signatures.
pub mod types;
mod utils;
mod var;

pub use crate::{
    config::{ConfigError, EngineConfig, EngineKind},
    engine::{
        Engine, EngineError, EngineStats, NaiveEngine, ThreadedEngine, create_engine,
        create_engine_from_env,
    },
    operator::Completion,
    types::{
        AsyncFn, Context, DeleteFn, DeviceKind, OprHandle, RunContext, SharedAsyncFn, SyncFn,
        VarHandle,
    },
};
