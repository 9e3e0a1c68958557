//! Supervisor for detached work.
//!
//! Provisioning, stop+upload and per-server watchdog work run as detached
//! tasks so callers get an immediate acknowledgement. The supervisor keeps
//! their handles so shutdown (and tests) can wait for in-flight work.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, error};

#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a detached task.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        // Reap finished tasks so the set does not grow unbounded.
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Supervised task panicked");
            }
        }

        debug!(task = name, in_flight = tasks.len() + 1, "Spawning task");
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every task, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.lock());
            if tasks.is_empty() {
                return;
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Supervised task panicked");
                }
            }
        }
    }
}
