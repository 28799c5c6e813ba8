//! Persistence worker thread implementation
//!
//! Each worker owns a dedicated OS thread running a current-thread tokio
//! runtime and drains its command channel in FIFO order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::memory_db::{ChatStore, NewMessage};
use crate::messages::ErrorMessages;
use crate::metrics;

pub enum PersistCommand {
    StoreMessage(NewMessage),

    /// Acknowledged once every command queued before it has been handled.
    Flush(oneshot::Sender<()>),

    Shutdown,
}

pub struct PersistenceWorker {
    name: String,
    thread_handle: Option<JoinHandle<()>>,
}

impl PersistenceWorker {
    pub fn spawn(
        name: String,
        command_receiver: mpsc::UnboundedReceiver<PersistCommand>,
        store: Arc<dyn ChatStore>,
    ) -> anyhow::Result<Self> {
        let thread_name = name.clone();
        let thread_handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create runtime for {}: {}", thread_name, e);
                        return;
                    }
                };
                rt.block_on(Self::run_worker_loop(thread_name, command_receiver, store));
            })?;

        info!("Spawned persistence worker: {}", name);
        Ok(Self { name, thread_handle: Some(thread_handle) })
    }

    async fn run_worker_loop(
        name: String,
        mut receiver: mpsc::UnboundedReceiver<PersistCommand>,
        store: Arc<dyn ChatStore>,
    ) {
        while let Some(command) = receiver.recv().await {
            match command {
                PersistCommand::StoreMessage(message) => {
                    Self::store_message(store.as_ref(), &message).await;
                }
                PersistCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
                PersistCommand::Shutdown => break,
            }
        }
        info!("Persistence worker {} shutting down", name);
    }

    async fn store_message(store: &dyn ChatStore, message: &NewMessage) {
        match store.insert_message(message).await {
            Ok(id) => {
                debug!("Persisted {} message {} for session {}", message.role, id, message.session_id);
            }
            Err(e) => {
                metrics::inc_persistence_failures();
                error!("{} for session {}: {}", ErrorMessages::MEMORY_SAVE_FAILED, message.session_id, e);
            }
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Persistence worker {} panicked", self.name);
            }
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.join();
    }
}
