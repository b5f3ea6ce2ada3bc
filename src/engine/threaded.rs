use crate::{
    config::EngineConfig,
    engine::{
        Engine, EngineError,
        execute::{Dispatch, run_worker},
    },
    operator::{OprBlock, ThreadedOpr},
    pool::{HandleTable, ObjectPool},
    queue::BlockingQueue,
    sync::{Arc, AtomicUsize, Condvar, JoinHandle, Mutex, Ordering, spawn},
    types::{AsyncFn, Context, DeleteFn, OprHandle, SharedAsyncFn, VarHandle},
    utils::AccessSets,
    var::{Access, ThreadedVar},
};
use derive_more::Debug;
use tracing::{debug, error, trace};

/// Dependency-tracked engine running operators on a fixed pool of worker
/// threads.
///
/// Dropping the engine waits for every pushed operator, then stops and joins
/// the workers.
#[derive(Debug)]
pub struct ThreadedEngine {
    shared: Arc<Shared>,
    #[debug(skip)]
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Point-in-time counters of a [`ThreadedEngine`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Operators pushed and not completed yet.
    pub pending: usize,
    /// Variables allocated and not released yet.
    pub live_vars: usize,
    /// Operator descriptors alive, both reusable and one-shot.
    pub live_operators: usize,
    /// Runnable operator instances alive.
    pub live_blocks: usize,
}

/// State shared by the engine front-end, the workers and every outstanding
/// [`Completion`](crate::Completion).
#[derive(Debug)]
pub(crate) struct Shared {
    vars: HandleTable<ThreadedVar>,
    oprs: HandleTable<ThreadedOpr>,
    var_pool: ObjectPool<ThreadedVar>,
    opr_pool: ObjectPool<ThreadedOpr>,
    block_pool: ObjectPool<OprBlock>,
    pub(super) queue: BlockingQueue<Dispatch>,
    /// Number of operators pushed and not completed yet.
    pending: AtomicUsize,
    #[debug(skip)]
    finished: Mutex<()>,
    #[debug(skip)]
    finished_cv: Condvar,
}

impl ThreadedEngine {
    /// Start an engine with `config.resolved_num_workers()` worker threads.
    ///
    /// # Errors
    /// If a worker thread can't be spawned. Workers started before the
    /// failure are stopped again.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let shared = Arc::new(Shared::new(config.pool_capacity));
        let num_workers = config.resolved_num_workers();
        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let worker_shared = Arc::clone(&shared);
            let name = format!("{}-{index}", config.thread_name);
            match spawn(name, move || run_worker(&worker_shared, index)) {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    shared.queue.kill();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(EngineError::WorkerSpawn { index, source });
                }
            }
        }
        debug!(num_workers, "threaded engine started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let Shared {
            var_pool,
            opr_pool,
            block_pool,
            pending,
            ..
        } = &*self.shared;
        EngineStats {
            pending: pending.load(Ordering::Acquire),
            live_vars: var_pool.live(),
            live_operators: opr_pool.live(),
            live_blocks: block_pool.live(),
        }
    }

    /// Wait for every pushed operator, then stop and join the workers.
    /// Equivalent to dropping the engine.
    pub fn shutdown(self) {
        drop(self);
    }

    fn stop(&self) {
        let mut workers = self.workers.lock().expect("ThreadedEngine::stop: [1]");
        if workers.is_empty() {
            return;
        }
        self.wait_for_all();
        self.shared.queue.kill();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        debug!("threaded engine stopped");
    }

    fn resolve(&self, var: VarHandle) -> Arc<ThreadedVar> {
        self.shared
            .vars
            .get(var.0)
            .unwrap_or_else(|| panic!("unknown or deleted variable {var:?}"))
    }

    fn new_opr(
        &self,
        sets: &AccessSets,
        set_body: impl FnOnce(&mut ThreadedOpr),
    ) -> Arc<ThreadedOpr> {
        let use_vars: Vec<_> = sets.use_vars.iter().map(|&var| self.resolve(var)).collect();
        let mutate_vars: Vec<_> = sets
            .mutate_vars
            .iter()
            .map(|&var| self.resolve(var))
            .collect();
        self.shared.opr_pool.acquire(|opr| {
            set_body(opr);
            opr.use_vars.extend(use_vars);
            opr.mutate_vars.extend(mutate_vars);
        })
    }
}

impl Drop for ThreadedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Engine for ThreadedEngine {
    fn new_var(&self) -> VarHandle {
        let var = self.shared.var_pool.acquire(|_| {});
        VarHandle(self.shared.vars.insert(var))
    }

    fn new_operator(
        &self,
        body: SharedAsyncFn,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    ) -> OprHandle {
        let sets = AccessSets::new(use_vars, mutate_vars);
        let opr = self.new_opr(&sets, |opr| opr.set_shared(body));
        OprHandle(self.shared.oprs.insert(opr))
    }

    fn delete_operator(&self, opr: OprHandle) {
        let opr = self
            .shared
            .oprs
            .remove(opr.0)
            .unwrap_or_else(|| panic!("unknown or deleted operator {opr:?}"));
        self.shared.opr_pool.release(opr);
    }

    fn push(&self, opr: OprHandle, ctx: Context) {
        let opr = self
            .shared
            .oprs
            .get(opr.0)
            .unwrap_or_else(|| panic!("unknown or deleted operator {opr:?}"));
        self.shared.push_block(opr, ctx, false);
    }

    fn push_async(
        &self,
        body: AsyncFn,
        ctx: Context,
        use_vars: &[VarHandle],
        mutate_vars: &[VarHandle],
    ) {
        let sets = AccessSets::new(use_vars, mutate_vars);
        let opr = self.new_opr(&sets, |opr| opr.set_once(body));
        self.shared.push_block(opr, ctx, false);
    }

    fn push_delete(&self, delete_fn: DeleteFn, ctx: Context, var: VarHandle) {
        // Unregister first so the handle can't be used again.
        let var = self
            .shared
            .vars
            .remove(var.0)
            .unwrap_or_else(|| panic!("unknown or deleted variable {var:?}"));
        let opr = self.shared.opr_pool.acquire(|opr| {
            opr.set_once(Box::new(move |_, done| {
                delete_fn();
                done.complete();
            }));
            opr.mutate_vars.push(var);
        });
        self.shared.push_block(opr, ctx, true);
    }

    fn wait_for_var(&self, var: VarHandle) {
        if self.resolve(var).is_idle() {
            return;
        }
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let notify = Arc::clone(&signal);
        self.push_async(
            Box::new(move |_, done| {
                done.complete();
                let (flag, cond) = &*notify;
                *flag.lock().expect("ThreadedEngine::wait_for_var: [1]") = true;
                cond.notify_all();
            }),
            Context::cpu(),
            &[],
            &[var],
        );
        let (flag, cond) = &*signal;
        let mut done = flag.lock().expect("ThreadedEngine::wait_for_var: [2]");
        while !*done {
            done = cond.wait(done).expect("ThreadedEngine::wait_for_var: [3]");
        }
    }

    fn wait_for_all(&self) {
        let Shared {
            pending,
            finished,
            finished_cv,
            ..
        } = &*self.shared;
        let mut guard = finished.lock().expect("ThreadedEngine::wait_for_all: [1]");
        while pending.load(Ordering::Acquire) != 0 {
            guard = finished_cv
                .wait(guard)
                .expect("ThreadedEngine::wait_for_all: [2]");
        }
    }
}

impl Shared {
    fn new(pool_capacity: usize) -> Self {
        Self {
            vars: HandleTable::default(),
            oprs: HandleTable::default(),
            var_pool: ObjectPool::new(pool_capacity),
            opr_pool: ObjectPool::new(pool_capacity),
            block_pool: ObjectPool::new(pool_capacity),
            queue: BlockingQueue::new(),
            pending: AtomicUsize::new(0),
            finished: Mutex::new(()),
            finished_cv: Condvar::new(),
        }
    }

    /// Register one run of `opr` against its variables and dispatch it if
    /// nothing blocks it. With `delete`, the write on its single mutated
    /// variable is the variable's deletion.
    fn push_block(&self, opr: Arc<ThreadedOpr>, ctx: Context, delete: bool) {
        let write = if delete { Access::Delete } else { Access::Write };
        let mut accesses: Vec<_> = opr
            .mutate_vars
            .iter()
            .map(|var| (var, write))
            .chain(opr.use_vars.iter().map(|var| (var, Access::Read)))
            .collect();
        let block = self
            .block_pool
            .acquire(|block| block.init(Arc::clone(&opr), ctx));
        let num_ready = match ThreadedVar::append_all(&mut accesses, &block) {
            Ok(num_ready) => num_ready,
            Err(rejected) => {
                drop(accesses);
                self.block_pool.release(block);
                if opr.temporary {
                    self.opr_pool.release(opr);
                }
                match rejected {
                    Access::Delete => panic!("variable deleted twice"),
                    Access::Read | Access::Write => {
                        panic!("access submitted to a variable scheduled for deletion")
                    }
                }
            }
        };
        for _ in 0..num_ready {
            let released = block.decr_wait();
            debug_assert!(!released, "Shared::push_block: [1]");
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        trace!(
            %ctx,
            reads = opr.use_vars.len(),
            writes = opr.mutate_vars.len(),
            deferred = opr.use_vars.len() + opr.mutate_vars.len() - num_ready,
            "operator pushed"
        );
        // Drop the submission guard.
        if block.decr_wait() {
            self.queue.push(Dispatch::Run(block));
        }
    }

    pub(crate) fn post_completion(&self, block: Arc<OprBlock>) {
        self.queue.push(Dispatch::Complete(block));
    }

    /// Advance the FIFO of every variable the finished operator touched and
    /// dispatch whatever became runnable.
    pub(super) fn on_complete(&self, block: Arc<OprBlock>) {
        let opr = Arc::clone(block.opr.as_ref().expect("Shared::on_complete: [1]"));
        let mut granted = Vec::new();
        let mut released = Vec::new();
        for var in &opr.mutate_vars {
            if var.complete_write(&mut granted) {
                released.push(Arc::clone(var));
            }
        }
        for var in &opr.use_vars {
            granted.extend(var.complete_read());
        }
        for next in granted {
            if next.decr_wait() {
                self.queue.push(Dispatch::Run(next));
            }
        }

        // The block holds a reference to the descriptor, which holds the
        // variables: release in that order so each one is uniquely owned.
        self.block_pool.release(block);
        if opr.temporary {
            self.opr_pool.release(opr);
        } else {
            drop(opr);
        }
        for var in released {
            trace!("variable released");
            self.var_pool.release(var);
        }

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.finished.lock().expect("Shared::on_complete: [2]");
            self.finished_cv.notify_all();
        }
    }
}
