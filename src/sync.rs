#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::{
        sync::{
            Condvar, Mutex, MutexGuard,
            atomic::{AtomicUsize, Ordering},
        },
        thread::JoinHandle,
    };
    pub(crate) use std::sync::Arc;

    /// Loom threads are anonymous, so the name is dropped.
    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn spawn(
        _name: String,
        f: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        Ok(loom::thread::spawn(f))
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use std::{
        sync::{
            Arc, Condvar, Mutex, MutexGuard,
            atomic::{AtomicUsize, Ordering},
        },
        thread::JoinHandle,
    };

    pub(crate) fn spawn(
        name: String,
        f: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(f)
    }
}

pub(crate) use imp::*;
