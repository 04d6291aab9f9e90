//! Bounded fan-out/fan-in worker pool.
//!
//! One producer (the calling task) feeds a bounded queue, a fixed number of workers drain it, and
//! every handled item yields exactly one result. The call returns once the producer has closed the
//! queue and all workers have finished, so the caller sees a complete set of per-item outcomes.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::error::SyncError;

/// Runs `handler` over `items` with `workers` concurrent workers.
///
/// Results arrive in completion order, not input order. A panicking worker surfaces as
/// [`SyncError::WorkerJoin`] after the remaining workers have drained the queue.
pub async fn run_pool<I, O, F, Fut>(
    workers: usize,
    items: Vec<I>,
    handler: F,
) -> Result<Vec<O>, SyncError>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
{
    let workers = workers.max(1);
    let total = items.len();
    debug!(workers, items = total, "Starting worker pool");

    let (work_tx, work_rx) = mpsc::channel::<I>(workers);
    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<O>();
    let handler = Arc::new(handler);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let work_rx = Arc::clone(&work_rx);
        let result_tx = result_tx.clone();
        let handler = Arc::clone(&handler);
        handles.push(tokio::spawn(async move {
            loop {
                let next = work_rx.lock().await.recv().await;
                let Some(item) = next else {
                    break;
                };
                if result_tx.send((*handler)(item).await).is_err() {
                    break;
                }
            }
            trace!(worker_id, "Worker finished");
        }));
    }
    drop(result_tx);

    for item in items {
        if work_tx.send(item).await.is_err() {
            // Every worker is gone; the join below reports why.
            break;
        }
    }
    drop(work_tx);

    let joined = join_all(handles).await;

    let mut results = Vec::with_capacity(total);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }

    for outcome in joined {
        if let Err(e) = outcome {
            return Err(SyncError::WorkerJoin(e.to_string()));
        }
    }

    debug!(results = results.len(), "Worker pool drained");
    Ok(results)
}
