//! Process supervisor for background tasks.
//!
//! Owns the shutdown broadcast. Each background task (order consumer,
//! reconciler, stock flusher) subscribes before it is spawned and is awaited
//! with a timeout on shutdown.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Spawns named background tasks and stops them together.
#[derive(Debug)]
pub struct Supervisor {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Supervisor with no tasks.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// A receiver that fires when [`Supervisor::shutdown`] is called.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn `task` under `name`.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(task = name, "Starting background task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Track an already spawned task.
    pub fn adopt(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    /// Number of supervised tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are supervised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal shutdown and wait up to `timeout` for each task. Tasks that
    /// overrun are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        info!(tasks = self.tasks.len(), "Stopping background tasks");
        // No receivers left means every task already exited.
        let _ = self.shutdown_tx.send(());

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "Background task stopped gracefully"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
                Err(_) => {
                    warn!(task = name, "Background task shutdown timed out, aborting");
                    handle.abort();
                }
            }
        }

        info!("Background tasks stopped");
    }
}
