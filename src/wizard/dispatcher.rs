//! Per-user dispatch: one worker task per active user, fed by a queue.
//!
//! Inputs for one user are handled strictly in arrival order; different users
//! are handled in parallel. A worker exits as soon as its queue drains and
//! deregisters under the map lock, so an input is never left in a queue that
//! nobody reads.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error};

use crate::channels::InputStream;

use super::events::WizardInput;
use super::service::WizardService;

type Workers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<WizardInput>>>>;

pub struct WizardDispatcher {
    service: Arc<WizardService>,
    workers: Workers,
}

impl WizardDispatcher {
    pub fn new(service: Arc<WizardService>) -> Self {
        Self {
            service,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `input` on its user's worker, starting one if needed.
    pub async fn dispatch(&self, input: WizardInput) {
        let user_id = input.user_id().to_string();
        let mut workers = self.workers.lock().await;

        let input = match workers.get(&user_id) {
            Some(tx) => match tx.send(input) {
                Ok(()) => return,
                Err(mpsc::error::SendError(input)) => input,
            },
            None => input,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, send cannot fail.
        let _ = tx.send(input);
        workers.insert(user_id.clone(), tx);
        debug!(user_id = %user_id, "Starting wizard worker");
        tokio::spawn(run_worker(
            Arc::clone(&self.service),
            Arc::clone(&self.workers),
            user_id,
            rx,
        ));
    }

    /// Dispatch everything from `stream` until it ends.
    pub async fn run(&self, mut stream: InputStream) {
        while let Some(input) = stream.next().await {
            self.dispatch(input).await;
        }
        debug!("Input stream ended");
    }

    /// Number of users with a live worker.
    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }
}

async fn run_worker(
    service: Arc<WizardService>,
    workers: Workers,
    user_id: String,
    mut rx: mpsc::UnboundedReceiver<WizardInput>,
) {
    loop {
        while let Ok(input) = rx.try_recv() {
            if let Err(e) = service.handle(input).await {
                error!(user_id = %user_id, "Failed to deliver wizard output: {e}");
            }
        }

        let mut map = workers.lock().await;
        if rx.is_empty() {
            map.remove(&user_id);
            debug!(user_id = %user_id, "Wizard worker idle, exiting");
            return;
        }
    }
}
