use crate::{
    operator::OprBlock,
    pool::Recycle,
    sync::{Arc, Mutex, MutexGuard},
};
use derive_more::Debug;

/// Access an operator run requests on one of its variables.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
    /// Write that retires the variable. No access may follow it.
    Delete,
}

/// Outcome of appending an access to a variable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
enum Grant {
    /// The access may proceed right away.
    Ready,
    /// The access is queued and will be granted by a later completion.
    Deferred,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AccessKind {
    Read,
    Write,
}

/// Queued intent to access a variable.
#[derive(Debug)]
struct AccessNode {
    kind: AccessKind,
    /// Block to release once the access is granted. `None` after the grant.
    trigger: Option<Arc<OprBlock>>,
    next: Option<u32>,
}

/// Variable guarded by the threaded engine.
///
/// Readers that were granted leave the FIFO and are only counted in
/// `num_pending_reads`. A write stays at the FIFO head from the moment it is
/// next in line until it completes, so `ready_to_read` is `false` exactly
/// while the FIFO is non-empty.
#[derive(Debug, Default)]
pub(crate) struct ThreadedVar {
    #[debug(skip)]
    state: Mutex<VarState>,
}

struct VarState {
    /// Slab of access nodes linked through `next`.
    nodes: Vec<AccessNode>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    num_pending_reads: usize,
    ready_to_read: bool,
    to_delete: bool,
}

impl Default for VarState {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            num_pending_reads: 0,
            ready_to_read: true,
            to_delete: false,
        }
    }
}

impl VarState {
    fn push_back(&mut self, kind: AccessKind, trigger: Option<Arc<OprBlock>>) {
        let node = AccessNode {
            kind,
            trigger,
            next: None,
        };
        let idx = if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = node;
            idx
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1)
                .try_into()
                .expect("VarState::push_back: [1]")
        };
        match self.tail {
            Some(tail) => self.nodes[tail as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn pop_front(&mut self) -> Option<AccessNode> {
        let idx = self.head?;
        let node = &mut self.nodes[idx as usize];
        let popped = AccessNode {
            kind: node.kind,
            trigger: node.trigger.take(),
            next: node.next.take(),
        };
        self.head = popped.next;
        if self.head.is_none() {
            self.tail = None;
        }
        self.free.push(idx);
        Some(popped)
    }

    fn head_kind(&self) -> Option<AccessKind> {
        self.head.map(|idx| self.nodes[idx as usize].kind)
    }

    fn take_head_trigger(&mut self) -> Option<Arc<OprBlock>> {
        let idx = self.head?;
        self.nodes[idx as usize].trigger.take()
    }

    /// Reads run at once unless a write is queued or running.
    fn append_read(&mut self, block: &Arc<OprBlock>) -> Grant {
        if self.ready_to_read {
            self.num_pending_reads += 1;
            return Grant::Ready;
        }
        self.push_back(AccessKind::Read, Some(Arc::clone(block)));
        Grant::Deferred
    }

    /// A write runs at once only on an idle variable.
    fn append_write(&mut self, block: &Arc<OprBlock>) -> Grant {
        let grant = if self.ready_to_read && self.num_pending_reads == 0 {
            Grant::Ready
        } else {
            Grant::Deferred
        };
        let trigger = (grant == Grant::Deferred).then(|| Arc::clone(block));
        self.push_back(AccessKind::Write, trigger);
        self.ready_to_read = false;
        self.check_consistent();
        grant
    }

    fn check_consistent(&self) {
        debug_assert_eq!(
            self.ready_to_read,
            self.head.is_none(),
            "VarState::check_consistent: [1]"
        );
        debug_assert!(
            self.head_kind() != Some(AccessKind::Read),
            "VarState::check_consistent: [2]"
        );
    }
}

impl ThreadedVar {
    fn lock(&self) -> MutexGuard<'_, VarState> {
        self.state.lock().expect("ThreadedVar::lock: [1]")
    }

    /// Register every access of one operator run as a single step.
    ///
    /// All the variables are locked in address order before the first
    /// append, so two submissions sharing several variables get the same
    /// relative order in each FIFO and can never wait on each other in a
    /// cycle. Variables must be distinct.
    ///
    /// Returns the number of accesses granted right away. If a variable is
    /// already scheduled for deletion, nothing is appended and the rejected
    /// access is returned instead.
    pub(crate) fn append_all(
        accesses: &mut [(&Arc<Self>, Access)],
        block: &Arc<OprBlock>,
    ) -> Result<usize, Access> {
        accesses.sort_unstable_by_key(|(var, _)| Arc::as_ptr(var));
        let mut states: Vec<_> = accesses.iter().map(|(var, _)| var.lock()).collect();
        if let Some(access) = states
            .iter()
            .zip(&*accesses)
            .find_map(|(state, &(_, access))| state.to_delete.then_some(access))
        {
            return Err(access);
        }

        let mut num_ready = 0;
        for (state, &(_, access)) in states.iter_mut().zip(&*accesses) {
            let grant = match access {
                Access::Read => state.append_read(block),
                Access::Write => state.append_write(block),
                Access::Delete => {
                    let grant = state.append_write(block);
                    state.to_delete = true;
                    grant
                }
            };
            if grant == Grant::Ready {
                num_ready += 1;
            }
        }
        Ok(num_ready)
    }

    /// Finish the running write at the FIFO head and grant its successors:
    /// either the next write, or every read up to the next write.
    ///
    /// Returns `true` if the variable was scheduled for deletion and is now
    /// drained.
    pub(crate) fn complete_write(&self, granted: &mut Vec<Arc<OprBlock>>) -> bool {
        let mut state = self.lock();
        assert_eq!(
            state.num_pending_reads, 0,
            "ThreadedVar::complete_write: [1]"
        );
        let finished = state.pop_front().expect("ThreadedVar::complete_write: [2]");
        assert_eq!(
            finished.kind,
            AccessKind::Write,
            "ThreadedVar::complete_write: [3]"
        );
        debug_assert!(finished.trigger.is_none(), "ThreadedVar::complete_write: [4]");
        loop {
            match state.head_kind() {
                None => {
                    state.ready_to_read = true;
                    break;
                }
                Some(AccessKind::Write) => {
                    if state.num_pending_reads == 0 {
                        granted.extend(state.take_head_trigger());
                    }
                    break;
                }
                Some(AccessKind::Read) => {
                    let read = state.pop_front().expect("ThreadedVar::complete_write: [5]");
                    state.num_pending_reads += 1;
                    granted.extend(read.trigger);
                }
            }
        }
        state.check_consistent();
        state.to_delete && state.ready_to_read && state.num_pending_reads == 0
    }

    /// Finish one granted read. The last reader out grants the write waiting
    /// at the head, if any.
    pub(crate) fn complete_read(&self) -> Option<Arc<OprBlock>> {
        let mut state = self.lock();
        state.num_pending_reads = state
            .num_pending_reads
            .checked_sub(1)
            .expect("ThreadedVar::complete_read: [1]");
        if state.num_pending_reads != 0 {
            return None;
        }
        state.take_head_trigger()
    }

    #[cfg(test)]
    pub(crate) fn is_to_delete(&self) -> bool {
        self.lock().to_delete
    }

    /// No access is queued or running.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.lock();
        state.ready_to_read && state.num_pending_reads == 0
    }
}

impl Recycle for ThreadedVar {
    fn recycle(&mut self) {
        let mut state = self.lock();
        debug_assert!(state.head.is_none(), "ThreadedVar::recycle: [1]");
        let mut nodes = core::mem::take(&mut state.nodes);
        let mut free = core::mem::take(&mut state.free);
        nodes.clear();
        free.clear();
        *state = VarState {
            nodes,
            free,
            ..VarState::default()
        };
    }
}
