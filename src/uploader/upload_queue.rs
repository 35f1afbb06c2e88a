use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::errors::{AppError, AppResult};

type Job = BoxFuture<'static, ()>;

struct QueueState {
    running: usize,
    waiting: VecDeque<Job>,
}

struct Inner {
    capacity: usize,
    runtime: Handle,
    state: Mutex<QueueState>,
}

impl Inner {
    // Never held across an await point, so a poisoned lock still holds consistent counts.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases a running slot when the task finishes, panics included.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.inner.lock_state();
            state.running = state.running.saturating_sub(1);
        }
        dispatch(&self.inner);
    }
}

/// Start waiting jobs while there is free capacity. Each freed slot pulls
/// exactly one more job.
fn dispatch(inner: &Arc<Inner>) {
    loop {
        let job = {
            let mut state = inner.lock_state();
            if state.running >= inner.capacity {
                return;
            }
            match state.waiting.pop_front() {
                Some(job) => {
                    state.running += 1;
                    log::debug!(
                        "Upload slot taken ({}/{} running, {} waiting)",
                        state.running,
                        inner.capacity,
                        state.waiting.len()
                    );
                    job
                }
                None => return,
            }
        };

        let slot = SlotGuard {
            inner: inner.clone(),
        };
        inner.runtime.spawn(async move {
            let _slot = slot;
            job.await;
        });
    }
}

/// FIFO queue that runs at most `capacity` upload tasks at once.
///
/// Tasks are spawned onto the runtime the queue was created on, so a task
/// starts as soon as a slot frees up whether or not anyone polls its result.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

impl UploadQueue {
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(AppError::validation(
                "max_concurrent_uploads",
                "Queue capacity must be at least 1",
            ));
        }

        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("Upload queue needs a tokio runtime: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                capacity,
                runtime,
                state: Mutex::new(QueueState {
                    running: 0,
                    waiting: VecDeque::new(),
                }),
            }),
        })
    }

    /// Queue `task` and return a future for its own outcome. The task is not
    /// invoked until it is given a slot.
    pub fn submit<T, F, Fut>(&self, task: F) -> impl Future<Output = AppResult<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();

        let job: Job = Box::pin(async move {
            let result = task().await;
            if result_tx.send(result).is_err() {
                log::debug!("Upload result dropped, caller no longer waiting");
            }
        });

        self.inner.lock_state().waiting.push_back(job);
        dispatch(&self.inner);

        async move {
            result_rx.await.map_err(|_| {
                AppError::Internal("Upload task ended without producing a result".to_string())
            })?
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn running(&self) -> usize {
        self.inner.lock_state().running
    }

    pub fn waiting(&self) -> usize {
        self.inner.lock_state().waiting.len()
    }
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("UploadQueue")
            .field("capacity", &self.inner.capacity)
            .field("running", &state.running)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}
