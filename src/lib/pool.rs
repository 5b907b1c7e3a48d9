//! A worker pool whose tasks may schedule further tasks.
//!
//! Every [`spawn`](TaskPool::spawn) bumps an outstanding-task counter and every finished task
//! lowers it, so [`wait`](TaskPool::wait) returns only once the tasks spawned by other tasks have
//! finished too.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::Error;

struct PoolState {
    outstanding: usize,
    first_error: Option<Error>,
}

struct PoolInner {
    threads: rayon::ThreadPool,
    state: Mutex<PoolState>,
    quiescent: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, result: Result<(), Error>) {
        let mut state = self.lock();
        if let Err(err) = result {
            tracing::debug!("task failed: {err}");
            state.first_error.get_or_insert(err);
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.quiescent.notify_all();
        }
    }
}

/// A fixed-size pool of worker threads. Clones share the same workers and counter.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("threads", &self.inner.threads.current_num_threads())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl TaskPool {
    pub fn new(threads: usize) -> Result<Self, Error> {
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("vendor-fetch-worker-{i}"))
            .build()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                threads,
                state: Mutex::new(PoolState {
                    outstanding: 0,
                    first_error: None,
                }),
                quiescent: Condvar::new(),
            }),
        })
    }

    /// Queue `task`. A failure or panic is recorded and reported by [`wait`](Self::wait); it does
    /// not stop other tasks.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        self.inner.lock().outstanding += 1;
        let inner = Arc::clone(&self.inner);
        self.inner.threads.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|payload| Err(Error::TaskPanicked(panic_message(payload.as_ref()))));
            inner.finish(result);
        });
    }

    /// Block until no task is outstanding, then return the first failure, if any.
    ///
    /// Must not be called from inside a task.
    pub fn wait(&self) -> Result<(), Error> {
        let mut state = self.inner.lock();
        while state.outstanding > 0 {
            state = self
                .inner
                .quiescent
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match state.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Tasks spawned and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }
}
