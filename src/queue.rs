//! Blocking multi-producer/multi-consumer work queues.
//!
//! Two instances connect the pipeline: the assembly queue carries client ids
//! from the read path to the assembler workers, and the request queue carries
//! parsed envelopes from the workers to the application. Both are unbounded
//! FIFO with a blocking pop; flow control comes from the one-outstanding-read
//! rule, not from queue capacity.

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::client::ClientInfo;

/// What an application worker receives from [`crate::server::Server::next`].
#[derive(Debug, Clone)]
pub struct RequestEnvelope<M> {
    pub client: ClientInfo,
    pub message: M,
}

/// Unbounded FIFO queue with any number of producers and consumers.
///
/// Multiple consumers share the single receiver behind an async mutex, so a
/// pop parks the caller until an item arrives.
pub struct WorkQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T: Send> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn push(&self, item: T) {
        // The receiver lives as long as the queue, so this cannot fail.
        let _ = self.tx.send(item);
    }

    pub async fn pop(&self) -> T {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(item) => item,
            // Unreachable while the queue owns its sender; park forever
            // rather than fabricate an empty value.
            None => std::future::pending().await,
        }
    }
}

impl<T: Send> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
