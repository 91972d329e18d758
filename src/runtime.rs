//! Background task lifecycle shared by ingestion and the debounce driver.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A spawned task plus the signal that asks it to stop.
///
/// Dropping the handle without calling [`RuntimeHandle::stop`] aborts the
/// task, so whatever the task owns (e.g. a channel subscription) is released
/// on every exit path.
pub(crate) struct RuntimeHandle {
    name: &'static str,
    task: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RuntimeHandle {
    pub(crate) fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(shutdown_rx));
        tracing::debug!("Started {} task", name);
        Self {
            name,
            task,
            shutdown: Some(shutdown_tx),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the task to wind down
    pub(crate) async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            if !err.is_cancelled() {
                tracing::warn!("Failed to await {} task: {}", self.name, err);
            }
        }
        tracing::debug!("Stopped {} task", self.name);
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
