//! Copy-on-write model snapshot handle.
//!
//! The publisher swaps a whole `Arc<dyn Policy>` per training step. Readers
//! clone the `Arc` they find and keep using it, so they observe either the
//! previous or the next snapshot, never a mix of both.

use std::sync::Arc;
use tokio::sync::watch;

use super::Policy;

/// Create the single writer and a first reader for a model
pub fn model_handle(initial: Arc<dyn Policy>) -> (ModelPublisher, ModelReader) {
    let (tx, rx) = watch::channel(initial);
    (ModelPublisher { tx }, ModelReader { rx })
}

/// Write side, held only by the training loop
pub struct ModelPublisher {
    tx: watch::Sender<Arc<dyn Policy>>,
}

impl ModelPublisher {
    /// Replace the current snapshot
    pub fn publish(&self, snapshot: Arc<dyn Policy>) {
        self.tx.send_replace(snapshot);
    }

    pub fn reader(&self) -> ModelReader {
        ModelReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Clone-friendly read side
#[derive(Clone)]
pub struct ModelReader {
    rx: watch::Receiver<Arc<dyn Policy>>,
}

impl ModelReader {
    /// Current snapshot; holds no lock once returned
    pub fn current(&self) -> Arc<dyn Policy> {
        Arc::clone(&*self.rx.borrow())
    }

    pub fn step(&self) -> u64 {
        self.rx.borrow().step()
    }
}
