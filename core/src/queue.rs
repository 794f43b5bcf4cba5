//! Per-session serial execution of transport operations.
//!
//! Connect, reconnect and disconnect of one session must never overlap. Every
//! such operation is submitted to the session's [`SerialQueue`], which runs them
//! one at a time in submission order on a dedicated worker task. A failed or
//! panicking operation does not stop the queue.

use crate::error::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO executor for async operations.
pub struct SerialQueue {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
    /// Taken by the worker the first time an operation is added.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Submit an operation.
    ///
    /// The position in the queue is fixed when this is called, not when the
    /// returned future is first polled. Dropping the returned future does not
    /// cancel the operation.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let first = queue.add(async { connect().await });
    /// let second = queue.add(async { hint().await });
    /// // `hint` starts only after `connect` finished, whatever its outcome
    /// let (a, b) = futures::join!(first, second);
    /// ```
    pub fn add<F, T>(&self, op: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let name = self.name.clone();
        let job: Job = Box::pin(async move {
            match AssertUnwindSafe(op).catch_unwind().await {
                Ok(result) => {
                    let _ = done_tx.send(result);
                }
                Err(_) => {
                    log::error!("Operation on queue {} panicked", name);
                    let _ = done_tx.send(Err(Error::TaskPanicked));
                }
            }
        });

        let queued = self
            .start_worker()
            .and_then(|()| self.tx.send(job).map_err(|_| Error::QueueClosed));

        async move {
            queued?;
            done_rx.await.map_err(|_| Error::QueueClosed)?
        }
    }

    fn start_worker(&self) -> Result<()> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        if rx.is_none() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(format!("Serial queue needs a runtime: {}", e)))?;
        if let Some(mut jobs) = rx.take() {
            let name = self.name.clone();
            runtime.spawn(async move {
                while let Some(job) = jobs.recv().await {
                    job.await;
                }
                log::debug!("Serial queue {} stopped", name);
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_runs_in_submission_order_despite_failures() {
        let log = recorder();
        let queue = SerialQueue::new("test");

        let op = |name: &'static str, delay_ms: u64, fail: bool| {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().unwrap().push(name);
                if fail {
                    Err(Error::Other(format!("{} failed", name)))
                } else {
                    Ok(name)
                }
            }
        };

        // Earlier operations are slower: without serialization they would finish last
        let a = queue.add(op("A", 40, true));
        let b = queue.add(op("B", 30, false));
        let c = queue.add(op("C", 20, false));
        let d = queue.add(op("D", 10, true));
        let e = queue.add(op("E", 0, false));

        let (a, b, c, d, e) = tokio::join!(a, b, c, d, e);
        assert!(a.is_err());
        assert_eq!(b.unwrap(), "B");
        assert_eq!(c.unwrap(), "C");
        assert!(d.is_err());
        assert_eq!(e.unwrap(), "E");

        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn test_operations_never_overlap() {
        let queue = SerialQueue::new("overlap");
        let running = Arc::new(Mutex::new(0usize));
        let max_seen = Arc::new(Mutex::new(0usize));

        let mut pending = Vec::new();
        for _ in 0..4 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            pending.push(queue.add(async move {
                {
                    let mut r = running.lock().unwrap();
                    *r += 1;
                    let mut m = max_seen.lock().unwrap();
                    *m = (*m).max(*r);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                *running.lock().unwrap() -= 1;
                Ok(())
            }));
        }
        for result in futures::future::join_all(pending).await {
            result.unwrap();
        }
        assert_eq!(*max_seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_future_still_runs() {
        let log = recorder();
        let queue = SerialQueue::new("drop");

        let first = log.clone();
        drop(queue.add(async move {
            first.lock().unwrap().push("dropped");
            Ok(())
        }));
        let second = log.clone();
        queue
            .add(async move {
                second.lock().unwrap().push("awaited");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["dropped", "awaited"]);
    }

    #[tokio::test]
    async fn test_panicking_operation_does_not_stop_queue() {
        let queue = SerialQueue::new("panic");
        let failed: Result<()> = queue
            .add(async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert!(matches!(failed, Err(Error::TaskPanicked)));

        let value = queue.add(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
