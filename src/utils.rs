use crate::types::{IndexSet, VarHandle};

/// Read and write sets of one submission, deduplicated and disjoint.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AccessSets {
    pub(crate) use_vars: IndexSet<VarHandle>,
    pub(crate) mutate_vars: IndexSet<VarHandle>,
}

impl AccessSets {
    /// A variable listed in both sets is only kept as a write. First
    /// occurrence order is preserved.
    pub(crate) fn new(use_vars: &[VarHandle], mutate_vars: &[VarHandle]) -> Self {
        let mutate_vars: IndexSet<_> = mutate_vars.iter().copied().collect();
        let use_vars = use_vars
            .iter()
            .copied()
            .filter(|var| !mutate_vars.contains(var))
            .collect();
        Self {
            use_vars,
            mutate_vars,
        }
    }
}
