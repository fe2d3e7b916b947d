use crate::error::{ClientError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Single-worker command queue serializing coordination work.
///
/// All partition bookkeeping runs through one instance of this executor, so
/// the tracker never needs contended locking: commands are values sent to a
/// bounded queue consumed by one worker task, and callers await a oneshot for
/// the result. Errors raised inside scheduled work are delivered back to the
/// awaiting caller.
pub struct SerialExecutor {
    sender: mpsc::Sender<Job>,
}

impl SerialExecutor {
    /// Spawn the worker task and return a handle to its queue
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(64);

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job().await;
            }
            debug!("serial executor worker stopped");
        });

        Self { sender }
    }

    /// Run a command on the worker, awaiting its result.
    ///
    /// Commands execute strictly in submission order, one at a time. If the
    /// worker has stopped or the command is dropped without completing, an
    /// internal error is returned to the caller.
    pub async fn run<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                let result = work().await;
                let _ = tx.send(result);
            })
        });

        self.sender.send(job).await.map_err(|_| {
            ClientError::Internal("coordination worker is not running".to_string())
        })?;

        rx.await.map_err(|_| {
            ClientError::Internal("coordination work dropped before completion".to_string())
        })
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn commands_run_in_submission_order() {
        let executor = Arc::new(SerialExecutor::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let executor = executor.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .run(move || async move {
                        // A slow early command must not be overtaken
                        if i == 0 {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                        }
                        order.lock().push(i);
                    })
                    .await
                    .unwrap();
            }));
            // Keep submission order deterministic
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn errors_inside_scheduled_work_reach_the_caller() {
        let executor = SerialExecutor::new();
        let outcome: Result<u64> = executor
            .run(|| async { Err(ClientError::Broker("metadata lookup failed".to_string())) })
            .await
            .unwrap();
        assert!(matches!(outcome, Err(ClientError::Broker(_))));
    }

    #[tokio::test]
    async fn results_are_returned_to_the_awaiting_caller() {
        let executor = SerialExecutor::new();
        let value = executor.run(|| async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
    }
}
