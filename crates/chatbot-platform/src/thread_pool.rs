//! Background write pool
//!
//! Message and summary rows are handed to a small fixed set of dedicated
//! worker threads so durable writes never sit on the chat response path.
//! Jobs for one session always go to the same worker, which keeps their
//! relative order.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::Config;
use crate::memory_db::{ChatStore, NewMessage};
use crate::worker_threads::{PersistCommand, PersistenceWorker};

pub const DEFAULT_PERSISTENCE_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    pub persistence_threads: usize,
}

impl ThreadPoolConfig {
    pub fn new(config: &Config) -> Self {
        Self { persistence_threads: config.persistence_workers.max(1) }
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self { persistence_threads: DEFAULT_PERSISTENCE_WORKERS }
    }
}

pub struct PersistencePool {
    command_senders: Vec<mpsc::UnboundedSender<PersistCommand>>,
    workers: Mutex<Vec<PersistenceWorker>>,
}

impl PersistencePool {
    pub fn start(config: ThreadPoolConfig, store: Arc<dyn ChatStore>) -> anyhow::Result<Self> {
        info!("Starting persistence pool with config: {:?}", config);

        let mut command_senders = Vec::new();
        let mut workers = Vec::new();
        for i in 0..config.persistence_threads.max(1) {
            let (tx, rx) = mpsc::unbounded_channel();
            workers.push(PersistenceWorker::spawn(
                format!("persistence-worker-{}", i),
                rx,
                Arc::clone(&store),
            )?);
            command_senders.push(tx);
        }

        info!("Persistence pool started with {} workers", workers.len());
        Ok(Self { command_senders, workers: Mutex::new(workers) })
    }

    fn worker_for(&self, session_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.command_senders.len()
    }

    /// Queues a write and returns immediately. Best-effort: a write submitted
    /// after shutdown is dropped with a warning.
    pub fn submit(&self, message: NewMessage) {
        let index = self.worker_for(&message.session_id);
        if self.command_senders[index].send(PersistCommand::StoreMessage(message)).is_err() {
            warn!("Persistence pool is shut down; dropping write");
        }
    }

    /// Resolves once every write submitted before the call has been handled.
    pub async fn flush(&self) {
        let mut pending = Vec::new();
        for sender in &self.command_senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(PersistCommand::Flush(tx)).is_ok() {
                pending.push(rx);
            }
        }
        for rx in pending {
            let _ = rx.await;
        }
    }

    pub async fn shutdown(&self) {
        info!("Shutting down persistence pool");
        self.flush().await;
        for sender in &self.command_senders {
            let _ = sender.send(PersistCommand::Shutdown);
        }

        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let _ = tokio::task::spawn_blocking(move || drop(workers)).await;
        info!("Persistence pool shutdown complete");
    }
}

impl Drop for PersistencePool {
    fn drop(&mut self) {
        for sender in &self.command_senders {
            let _ = sender.send(PersistCommand::Shutdown);
        }
        let workers = match self.workers.get_mut() {
            Ok(workers) => workers,
            Err(poisoned) => poisoned.into_inner(),
        };
        for worker in workers.iter_mut() {
            worker.join();
        }
    }
}
