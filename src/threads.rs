//! Thread tools
//!
//! Node-local work inside projection, arithmetic and operator application runs
//! on a rayon pool owned by an [`ExecutionContext`]. The default context is
//! sized by a process-wide maximum thread count, which a [`SerialGuard`] can
//! force to one for the duration of a scope.

use crate::types::{Error, Result};
use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

lazy_static! {
    static ref MAX_THREADS: AtomicUsize = AtomicUsize::new(rayon::current_num_threads().max(1));
    static ref SERIAL: Mutex<SerialState> = Mutex::new(SerialState {
        guards: 0,
        saved: 1
    });
}

struct SerialState {
    guards: usize,
    saved: usize,
}

fn serial_state() -> MutexGuard<'static, SerialState> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Create a pool
pub fn create_pool(num_threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build()
        .map_err(|e| Error::InvalidParameter(format!("cannot build thread pool: {e}")))
}

/// The process-wide maximum number of threads used by default contexts.
pub fn max_threads() -> usize {
    MAX_THREADS.load(Ordering::SeqCst)
}

/// Set the process-wide maximum number of threads. Zero is treated as one.
pub fn set_max_threads(num_threads: usize) {
    MAX_THREADS.store(num_threads.max(1), Ordering::SeqCst);
}

/// A scope-bound set of worker threads passed into the tree builders.
pub struct ExecutionContext {
    pool: ThreadPool,
}

impl ExecutionContext {
    /// Create a context with a given number of threads.
    pub fn new(num_threads: usize) -> Result<Self> {
        Ok(Self {
            pool: create_pool(num_threads)?,
        })
    }

    /// Create a context sized by the process-wide setting.
    pub fn global() -> Result<Self> {
        Self::new(max_threads())
    }

    /// Create a single threaded context.
    pub fn serial() -> Result<Self> {
        Self::new(1)
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool of this context.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

/// Forces the process-wide thread count to one while alive.
///
/// Guards are counted process wide, so they may overlap across threads. The
/// first guard saves the current setting and the last one to be dropped
/// restores it, including during unwinding. Changes made with
/// [`set_max_threads`] while a guard is alive are overwritten on restore.
pub struct SerialGuard {
    _private: (),
}

impl SerialGuard {
    /// Force single threaded execution, saving the current setting if no
    /// other guard is alive.
    pub fn new() -> Self {
        let mut state = serial_state();
        let previous = MAX_THREADS.swap(1, Ordering::SeqCst);
        if state.guards == 0 {
            state.saved = previous;
            debug!("Forcing serial execution (saved {previous} threads)");
        }
        state.guards += 1;
        Self { _private: () }
    }

    /// The thread count that will be restored when the last guard is dropped.
    pub fn saved(&self) -> usize {
        serial_state().saved
    }
}

impl Default for SerialGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialGuard {
    fn drop(&mut self) {
        let mut state = serial_state();
        state.guards -= 1;
        if state.guards == 0 {
            MAX_THREADS.store(state.saved, Ordering::SeqCst);
        } else {
            MAX_THREADS.store(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    lazy_static! {
        static ref SETTING: Mutex<()> = Mutex::new(());
    }

    #[test]
    fn test_serial_guard_restores() {
        let _lock = SETTING.lock().unwrap_or_else(|e| e.into_inner());
        set_max_threads(3);
        {
            let outer = SerialGuard::new();
            assert_eq!(outer.saved(), 3);
            assert_eq!(max_threads(), 1);
            {
                let inner = SerialGuard::new();
                assert_eq!(inner.saved(), 3);
            }
            assert_eq!(max_threads(), 1);
        }
        assert_eq!(max_threads(), 3);

        let result = std::panic::catch_unwind(|| {
            let _guard = SerialGuard::new();
            panic!("callable failed");
        });
        assert!(result.is_err());
        assert_eq!(max_threads(), 3);
    }

    #[test]
    fn test_overlapping_guards_on_threads() {
        //! Guards dropped out of creation order still restore the first saved value
        let _lock = SETTING.lock().unwrap_or_else(|e| e.into_inner());
        set_max_threads(4);
        let first = SerialGuard::new();
        let (created, release) = (std::sync::Barrier::new(2), std::sync::Barrier::new(2));
        std::thread::scope(|s| {
            s.spawn(|| {
                let _second = SerialGuard::new();
                created.wait();
                release.wait();
            });
            created.wait();
            drop(first);
            assert_eq!(max_threads(), 1);
            release.wait();
        });
        assert_eq!(max_threads(), 4);
    }

    #[test]
    fn test_context_size() {
        let ctx = ExecutionContext::new(2).unwrap();
        assert_eq!(ctx.num_threads(), 2);
        assert_eq!(ctx.install(|| rayon::current_num_threads()), 2);
        let ctx = ExecutionContext::serial().unwrap();
        assert_eq!(ctx.num_threads(), 1);
    }
}
