// cicd-fixer-rs/src/supervisor.rs
// Supervision of background analysis and application tasks.
//
// Tasks are fire-and-forget from the caller's point of view, but they are
// tracked here so shutdown (and tests) can wait for every terminal outcome
// to be recorded.

use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task. Finished tasks are reaped opportunistically.
    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while let Some(done) = tasks.try_join_next() {
            log_join_result(done);
        }
        tasks.spawn(async move {
            tracing::debug!(task = name, "background task started");
            task.await;
            tracing::debug!(task = name, "background task finished");
        });
    }

    /// Wait for every tracked task, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock().await);
            if batch.is_empty() {
                return;
            }
            while let Some(done) = batch.join_next().await {
                log_join_result(done);
            }
        }
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "background task panicked or was aborted");
        metrics::increment_counter!("cicd_fixer_task_failures_total");
    }
}
