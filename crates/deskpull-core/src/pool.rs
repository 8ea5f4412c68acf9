//! Bounded, FIFO task pool shared by every network call of a run.
//!
//! Listing calls and enrichment calls all go through one pool, so the
//! number of requests in flight never exceeds the configured concurrency
//! no matter which stage submitted them.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::AppError;

type Job = BoxFuture<'static, ()>;

#[derive(Default)]
struct PoolState {
    active: usize,
    queue: VecDeque<Job>,
}

/// Bounded-concurrency scheduler.
///
/// Queued tasks start in submission order; completion order is free.
/// Clones share the same slots.
#[derive(Clone)]
pub struct Pool {
    limit: usize,
    state: Arc<Mutex<PoolState>>,
}

impl Pool {
    /// Create a pool running at most `concurrency` tasks (at least one).
    pub fn new(concurrency: usize) -> Self {
        Self {
            limit: concurrency.max(1),
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.lock_state().active
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Queue `task` and return a future resolving to its output.
    ///
    /// The task is enqueued immediately, not when the returned future is
    /// first polled. A task that panics resolves only its own future, with
    /// [`AppError::PoolError`]; the slot is released either way.
    pub fn submit<F, T>(&self, task: F) -> impl Future<Output = Result<T, AppError>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = async move {
            let _ = tx.send(task.await);
        }
        .boxed();

        self.lock_state().queue.push_back(job);
        self.drain();

        async move {
            rx.await
                .map_err(|_| AppError::PoolError("task ended without a result".into()))
        }
    }

    /// Start queued tasks while slots are free.
    fn drain(&self) {
        loop {
            let job = {
                let mut state = self.lock_state();
                if state.active >= self.limit {
                    return;
                }
                match state.queue.pop_front() {
                    Some(job) => {
                        state.active += 1;
                        job
                    }
                    None => return,
                }
            };

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let slot = Slot { pool: self.clone() };
                    handle.spawn(async move {
                        let _slot = slot;
                        job.await;
                    });
                }
                Err(_) => {
                    // The job keeps its place and starts on the next drain
                    // made from inside a runtime.
                    let mut state = self.lock_state();
                    state.active -= 1;
                    state.queue.push_front(job);
                    tracing::warn!("Pool drained outside a tokio runtime; task left queued");
                    return;
                }
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool mutex");
            poisoned.into_inner()
        })
    }
}

/// Held by a running task; frees its slot and starts the next queued task
/// when dropped, whether the task finished or panicked.
struct Slot {
    pool: Pool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut state = self.pool.lock_state();
            state.active = state.active.saturating_sub(1);
        }
        self.pool.drain();
    }
}
