use crate::{
    engine::Engine,
    pool::HandleTable,
    sync::Arc,
    types::{AsyncFn, Context, DeleteFn, OprHandle, RunContext, SharedAsyncFn, SyncFn, VarHandle},
};
use tracing::trace;

/// Reference engine: runs every synchronous operator on the calling thread
/// at push time, in pure submission order.
///
/// It captures no dependencies, so asynchronous operators (one-shot or
/// reusable) are rejected with a panic. Useful to check client code against
/// a trivially correct ordering and as a test oracle.
#[must_use]
#[derive(Debug, Default)]
pub struct NaiveEngine {
    vars: HandleTable<()>,
    oprs: HandleTable<()>,
}

impl NaiveEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_vars<'a>(&self, vars: impl IntoIterator<Item = &'a VarHandle>) {
        for &var in vars {
            assert!(
                self.vars.get(var.0).is_some(),
                "unknown or deleted variable {var:?}"
            );
        }
    }
}

impl Engine for NaiveEngine {
    fn new_var(&self) -> VarHandle {
        VarHandle(self.vars.insert(Arc::new(())))
    }

    fn new_operator(
        &self,
        _body: SharedAsyncFn,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    ) -> OprHandle {
        self.check_vars(use_vars.iter().chain(mutate_vars));
        OprHandle(self.oprs.insert(Arc::new(())))
    }

    fn delete_operator(&self, opr: OprHandle) {
        assert!(
            self.oprs.remove(opr.0).is_some(),
            "unknown or deleted operator {opr:?}"
        );
    }

    fn push(&self, _opr: OprHandle, _ctx: Context) {
        panic!("cannot schedule async operations: the naive engine captures no dependencies");
    }

    fn push_async(
        &self,
        _body: AsyncFn,
        _ctx: Context,
        _use_vars: &[VarHandle],
        _mutate_vars: &[VarHandle],
    ) {
        panic!("cannot schedule async operations: the naive engine captures no dependencies");
    }

    fn push_sync(
        &self,
        body: SyncFn,
        ctx: Context,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    ) {
        self.check_vars(use_vars.iter().chain(mutate_vars));
        trace!(%ctx, "naive run");
        body(RunContext { ctx, stream: 0 });
    }

    fn push_delete(&self, delete_fn: DeleteFn, _ctx: Context, var: VarHandle) {
        assert!(
            self.vars.remove(var.0).is_some(),
            "unknown or deleted variable {var:?}"
        );
        delete_fn();
    }

    fn wait_for_var(&self, var: VarHandle) {
        self.check_vars([&var]);
    }

    fn wait_for_all(&self) {}
}
