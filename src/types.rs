use crate::{operator::Completion, pool::Key, sync::Arc};
use derive_more::Display;
use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;

/// Opaque reference to a variable, a guarded piece of external state.
///
/// Handles are cheap to copy. Once the variable is deleted the handle goes
/// stale and any further use of it is a fatal misuse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct VarHandle(pub(crate) Key);

/// Opaque reference to a reusable operator created with
/// [`Engine::new_operator`](crate::engine::Engine::new_operator).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OprHandle(pub(crate) Key);

/// Kind of device an operator is meant to run on.
#[derive(Debug, Display, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Host CPU.
    #[default]
    #[display("cpu")]
    Cpu,
    /// Accelerator card.
    #[display("gpu")]
    Gpu,
}

/// Execution target of an operator. Passed through to the body untouched.
#[derive(Debug, Display, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[display("{kind}({dev_id})")]
pub struct Context {
    /// Device kind.
    pub kind: DeviceKind,
    /// Device index within its kind.
    pub dev_id: u32,
}

impl Context {
    /// Context of the CPU device `0`.
    #[must_use]
    pub const fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            dev_id: 0,
        }
    }

    /// Context of the accelerator `dev_id`.
    #[must_use]
    pub const fn gpu(dev_id: u32) -> Self {
        Self {
            kind: DeviceKind::Gpu,
            dev_id,
        }
    }
}

/// Runtime information handed to an operator body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Context the operator was pushed with.
    pub ctx: Context,
    /// Stream slot the body runs on. For the threaded engine this is the
    /// index of the executing worker.
    pub stream: usize,
}

/// One-shot asynchronous body. Must eventually call
/// [`Completion::complete`].
pub type AsyncFn = Box<dyn FnOnce(RunContext, Completion) + Send>;
/// Reusable asynchronous body of an operator created once and pushed many
/// times.
pub type SharedAsyncFn = Arc<dyn Fn(RunContext, Completion) + Send + Sync>;
/// Synchronous body; completion is signaled as soon as it returns.
pub type SyncFn = Box<dyn FnOnce(RunContext) + Send>;
/// Body of a variable deletion.
pub type DeleteFn = Box<dyn FnOnce() + Send>;

pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
