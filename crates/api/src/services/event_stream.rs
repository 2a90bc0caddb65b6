//! In-process ordered event stream.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use domain::ports::{EventStream, ServiceError};
use tokio::sync::Notify;

/// FIFO stream with a single consumer in mind. Items are removed from the
/// queue only once `pull` is about to return, so a cancelled pull loses
/// nothing.
pub struct InMemoryEventStream<T> {
    name: &'static str,
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> InMemoryEventStream<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Items waiting to be pulled.
    pub fn backlog(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn drain(&self, max: usize) -> Vec<T> {
        let mut queue = self.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> EventStream<T> for InMemoryEventStream<T> {
    async fn publish(&self, item: T) -> Result<(), ServiceError> {
        self.lock().push_back(item);
        self.notify.notify_one();
        Ok(())
    }

    async fn pull(&self, max: usize, wait: Duration) -> Result<Vec<T>, ServiceError> {
        let max = max.max(1);
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let items = self.drain(max);
            if !items.is_empty() {
                return Ok(items);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }
}
