use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Bounded pool for background work such as item transfers. Tasks queue on
/// a semaphore so a large rebalance cannot flood the fleet.
pub struct TaskQueue {
    permits: Arc<Semaphore>,
}

impl TaskQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn dispatch<F>(&self, label: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let label = label.to_string();
        let task_id = Ulid::new().to_string();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            if let Err(error) = future.await {
                tracing::warn!(
                    "Background task failed: task={} id={} error={}",
                    label,
                    task_id,
                    error
                );
            }
        })
    }
}
