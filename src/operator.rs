use crate::{
    engine::threaded::Shared,
    pool::Recycle,
    sync::{Arc, AtomicUsize, Mutex, Ordering},
    types::{AsyncFn, Context, RunContext, SharedAsyncFn},
    var::ThreadedVar,
};
use derive_more::Debug;

/// Completion callback handed to every operator body.
///
/// The body must call [`Completion::complete`] exactly once, either before
/// returning or later from any other thread (e.g. the one that observes the
/// device work finishing). Calling it twice can't compile since it consumes
/// the token; dropping it unsignaled is a fatal misuse and panics.
#[must_use = "an operator must signal its completion"]
#[derive(Debug)]
pub struct Completion {
    #[debug(skip)]
    inner: Option<(Arc<Shared>, Arc<OprBlock>)>,
}

impl Completion {
    pub(crate) fn new(shared: Arc<Shared>, block: Arc<OprBlock>) -> Self {
        Self {
            inner: Some((shared, block)),
        }
    }

    /// Signal that the operator finished touching its variables.
    ///
    /// The completion is posted to the dispatch queue; a worker thread then
    /// releases the successors waiting on the operator's variables.
    pub fn complete(mut self) {
        let (shared, block) = self.inner.take().expect("Completion::complete: [1]");
        shared.post_completion(block);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.inner.is_some() && !std::thread::panicking() {
            tracing::error!("operator dropped its completion without signaling it");
            panic!("operator dropped its completion without signaling it");
        }
    }
}

/// Operator descriptor: the body plus its normalized read and write sets.
#[derive(Debug, Default)]
pub(crate) struct ThreadedOpr {
    #[debug(skip)]
    body: OprBody,
    pub(crate) use_vars: Vec<Arc<ThreadedVar>>,
    pub(crate) mutate_vars: Vec<Arc<ThreadedVar>>,
    /// Created implicitly by a push and released after its single run.
    pub(crate) temporary: bool,
}

#[derive(Default)]
enum OprBody {
    #[default]
    Empty,
    Once(Mutex<Option<AsyncFn>>),
    Shared(SharedAsyncFn),
}

impl ThreadedOpr {
    pub(crate) fn set_once(&mut self, body: AsyncFn) {
        self.body = OprBody::Once(Mutex::new(Some(body)));
        self.temporary = true;
    }

    pub(crate) fn set_shared(&mut self, body: SharedAsyncFn) {
        self.body = OprBody::Shared(body);
        self.temporary = false;
    }

    pub(crate) fn invoke(&self, rctx: RunContext, done: Completion) {
        match &self.body {
            OprBody::Empty => unreachable!("ThreadedOpr::invoke: [1]"),
            OprBody::Once(body) => {
                let body = body
                    .lock()
                    .expect("ThreadedOpr::invoke: [2]")
                    .take()
                    .expect("ThreadedOpr::invoke: [3]");
                body(rctx, done);
            }
            OprBody::Shared(body) => body(rctx, done),
        }
    }
}

impl Recycle for ThreadedOpr {
    fn recycle(&mut self) {
        self.body = OprBody::Empty;
        self.use_vars.clear();
        self.mutate_vars.clear();
        self.temporary = false;
    }
}

/// One runnable instance of an operator.
///
/// `wait` starts at the number of accesses plus one guard held by the
/// submitting thread. Every grant and the final guard release decrement it;
/// the block is dispatched by whoever brings it to zero.
#[derive(Debug, Default)]
pub(crate) struct OprBlock {
    wait: AtomicUsize,
    pub(crate) opr: Option<Arc<ThreadedOpr>>,
    pub(crate) ctx: Context,
}

impl OprBlock {
    pub(crate) fn init(&mut self, opr: Arc<ThreadedOpr>, ctx: Context) {
        let num_accesses = opr.use_vars.len() + opr.mutate_vars.len();
        self.wait = AtomicUsize::new(num_accesses + 1);
        self.opr = Some(opr);
        self.ctx = ctx;
    }

    /// Returns `true` if this call released the last dependency.
    pub(crate) fn decr_wait(&self) -> bool {
        let prev = self.wait.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "OprBlock::decr_wait: [1]");
        prev == 1
    }

    #[cfg(test)]
    pub(crate) fn wait(&self) -> usize {
        self.wait.load(Ordering::Acquire)
    }
}

impl Recycle for OprBlock {
    fn recycle(&mut self) {
        self.opr = None;
        self.ctx = Context::default();
    }
}
