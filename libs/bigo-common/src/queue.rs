use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::StoreError;

/// Fire-and-forget hand-off between the API and the worker pool
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    async fn enqueue(&self, id: Uuid) -> Result<(), StoreError>;

    /// Blocks up to `timeout`; `None` means nothing arrived
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, StoreError>;

    async fn depth(&self) -> Result<usize, StoreError>;
}

/// In-process FIFO queue
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
    depth: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubmissionQueue for MemoryQueue {
    async fn enqueue(&self, id: Uuid) -> Result<(), StoreError> {
        // Receiver lives as long as self, so send cannot fail
        if self.tx.send(id).is_ok() {
            self.depth.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, StoreError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(id)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(id))
            }
            Ok(None) | Err(_) => Ok(None),
        }
    }

    async fn depth(&self) -> Result<usize, StoreError> {
        Ok(self.depth.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 2);

        let timeout = Duration::from_millis(50);
        assert_eq!(queue.dequeue(timeout).await.unwrap(), Some(a));
        assert_eq!(queue.dequeue(timeout).await.unwrap(), Some(b));
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let popped = queue.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }
}
