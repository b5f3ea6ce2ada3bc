use crate::{
    engine::threaded::Shared,
    operator::{Completion, OprBlock},
    sync::Arc,
    types::RunContext,
};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Message carried by the dispatch queue.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// All dependencies of the block are granted; run its body.
    Run(Arc<OprBlock>),
    /// The body of the block signaled its completion.
    Complete(Arc<OprBlock>),
}

/// Worker loop: drain the dispatch queue until it is killed.
pub(super) fn run_worker(shared: &Arc<Shared>, index: usize) {
    debug!(worker = index, "worker started");
    while let Some(task) = shared.queue.pop() {
        match task {
            Dispatch::Run(block) => execute(shared, block, index),
            Dispatch::Complete(block) => shared.on_complete(block),
        }
    }
    debug!(worker = index, "worker stopped");
}

/// A panicking body leaves its variables locked forever, so it takes the
/// process down.
fn execute(shared: &Arc<Shared>, block: Arc<OprBlock>, worker: usize) {
    let opr = Arc::clone(block.opr.as_ref().expect("execute: [1]"));
    let rctx = RunContext {
        ctx: block.ctx,
        stream: worker,
    };
    let done = Completion::new(Arc::clone(shared), block);
    if panic::catch_unwind(AssertUnwindSafe(|| opr.invoke(rctx, done))).is_err() {
        error!(worker, "operator body panicked, aborting");
        std::process::abort();
    }
}
