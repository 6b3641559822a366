//! Batch worker loops and the handle used to manage them.
//!
//! All worker variants share one round contract: pull up to `batch_size`
//! items from the inbound transport, each pull bounded by `max_latency`,
//! closing the round early once the aggregate accumulation time since the
//! first pulled item exceeds `max_latency`. The batch function runs exactly
//! once per non-empty round and must return one output per input.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::communication::{ResultItem, WorkItem};
use crate::config::StreamerConfig;
use crate::error::{Error, Result};
use crate::model::{BatchProcessor, ManagedModel};
use crate::transport::WorkerTransport;
use crate::transport::pooled::PooledWorkerQueue;

/// Handle to a background loop running as a tokio task.
///
/// Dropping the handle clears the running flag and detaches; the loop
/// observes the flag within one bounded pull and exits on its own.
/// [`WorkerHandle::shutdown`] additionally awaits termination with a bound.
pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn spawn<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handle = task(running.clone());
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait up to `timeout` for it to finish
    /// its in-flight round and exit.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            None => Ok(()),
            Some(handle) => match tokio::time::timeout(timeout, handle).await {
                Err(_) => Err(Error::WorkerShutdownTimeout { timeout }),
                Ok(Err(join_error)) if join_error.is_panic() => {
                    std::panic::resume_unwind(join_error.into_panic())
                }
                Ok(_) => Ok(()),
            },
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Drive rounds against an async transport until the stop flag clears or
/// the transport goes away.
pub(crate) async fn run_worker_loop<T, P>(
    transport: Arc<T>,
    processor: Arc<P>,
    config: StreamerConfig,
    running: Arc<AtomicBool>,
) where
    T: WorkerTransport<P::Input, P::Output>,
    P: BatchProcessor,
{
    info!("batch worker started");
    while running.load(Ordering::SeqCst) {
        match run_round(transport.as_ref(), processor.as_ref(), &config).await {
            Ok(0) => tokio::time::sleep(config.idle_backoff).await,
            Ok(_) => {}
            Err(Error::BatchSizeMismatch { expected, got }) => {
                // Defect in the batch function. The round's callers will
                // time out; other in-flight tasks are unaffected, so the
                // worker keeps draining.
                error!(expected, got, "batch function output mismatch, round dropped");
            }
            Err(Error::ChannelClosed) => {
                debug!("transport closed, batch worker exiting");
                break;
            }
            Err(e) => {
                error!(error = %e, "batch worker transport failure, exiting");
                break;
            }
        }
    }
    info!("batch worker stopped");
}

async fn run_round<T, P>(transport: &T, processor: &P, config: &StreamerConfig) -> Result<usize>
where
    T: WorkerTransport<P::Input, P::Output>,
    P: BatchProcessor,
{
    let mut batch: Vec<WorkItem<P::Input>> = Vec::with_capacity(config.batch_size);
    let mut first_pull: Option<Instant> = None;

    while batch.len() < config.batch_size {
        match transport.recv_request(config.max_latency).await? {
            None => break,
            Some(item) => {
                first_pull.get_or_insert_with(Instant::now);
                batch.push(item);
            }
        }
        if first_pull.is_some_and(|started| started.elapsed() > config.max_latency) {
            break;
        }
    }
    if batch.is_empty() {
        return Ok(0);
    }

    let round_start = Instant::now();
    let expected = batch.len();
    let mut identities = Vec::with_capacity(expected);
    let mut inputs = Vec::with_capacity(expected);
    for item in batch {
        identities.push((item.client_id, item.task_id, item.item_index));
        inputs.push(item.payload);
    }

    let outputs = processor.process(inputs).await;
    if outputs.len() != expected {
        return Err(Error::BatchSizeMismatch {
            expected,
            got: outputs.len(),
        });
    }

    for ((client_id, task_id, item_index), payload) in identities.into_iter().zip(outputs) {
        transport
            .send_response(
                client_id,
                ResultItem {
                    task_id,
                    item_index,
                    payload,
                },
            )
            .await?;
    }

    debug!(batch_size = expected, spent = ?round_start.elapsed(), "processed batch round");
    Ok(expected)
}

/// Blocking twin of [`run_worker_loop`] for pooled worker threads, which
/// own their model instance and never touch the async runtime.
pub(crate) fn run_blocking_worker_loop<M>(
    queue: &PooledWorkerQueue<M::Input, M::Output>,
    model: &mut M,
    config: &StreamerConfig,
    stop: &AtomicBool,
) where
    M: ManagedModel,
{
    info!("pooled batch worker started");
    while !stop.load(Ordering::SeqCst) {
        match run_blocking_round(queue, model, config) {
            Ok(0) => std::thread::sleep(config.idle_backoff),
            Ok(_) => {}
            Err(Error::BatchSizeMismatch { expected, got }) => {
                error!(expected, got, "batch function output mismatch, round dropped");
            }
            Err(Error::ChannelClosed) => {
                debug!("transport closed, pooled batch worker exiting");
                break;
            }
            Err(e) => {
                error!(error = %e, "pooled batch worker transport failure, exiting");
                break;
            }
        }
    }
    info!("pooled batch worker stopped");
}

fn run_blocking_round<M>(
    queue: &PooledWorkerQueue<M::Input, M::Output>,
    model: &mut M,
    config: &StreamerConfig,
) -> Result<usize>
where
    M: ManagedModel,
{
    let mut batch: Vec<WorkItem<M::Input>> = Vec::with_capacity(config.batch_size);
    let mut first_pull: Option<Instant> = None;

    while batch.len() < config.batch_size {
        match queue.recv_request(config.max_latency)? {
            None => break,
            Some(item) => {
                first_pull.get_or_insert_with(Instant::now);
                batch.push(item);
            }
        }
        if first_pull.is_some_and(|started| started.elapsed() > config.max_latency) {
            break;
        }
    }
    if batch.is_empty() {
        return Ok(0);
    }

    let round_start = Instant::now();
    let expected = batch.len();
    let mut identities = Vec::with_capacity(expected);
    let mut inputs = Vec::with_capacity(expected);
    for item in batch {
        identities.push((item.task_id, item.item_index));
        inputs.push(item.payload);
    }

    let outputs = model.process(inputs);
    if outputs.len() != expected {
        return Err(Error::BatchSizeMismatch {
            expected,
            got: outputs.len(),
        });
    }

    for ((task_id, item_index), payload) in identities.into_iter().zip(outputs) {
        queue.send_response(ResultItem {
            task_id,
            item_index,
            payload,
        })?;
    }

    debug!(batch_size = expected, spent = ?round_start.elapsed(), "processed batch round");
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::Pill;
    use crate::transport::ClientTransport;
    use crate::transport::channel::channel;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingDoubler {
        round_sizes: Mutex<Vec<usize>>,
    }

    impl RecordingDoubler {
        fn new() -> Self {
            Self {
                round_sizes: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl BatchProcessor for RecordingDoubler {
        type Input = i64;
        type Output = i64;

        async fn process(&self, batch: Vec<i64>) -> Vec<i64> {
            self.round_sizes.lock().unwrap().push(batch.len());
            batch.into_iter().map(|v| v * 2).collect()
        }
    }

    /// Returns one output too few, for mismatch handling tests.
    struct Truncating;

    #[async_trait]
    impl BatchProcessor for Truncating {
        type Input = i64;
        type Output = i64;

        async fn process(&self, mut batch: Vec<i64>) -> Vec<i64> {
            batch.pop();
            batch
        }
    }

    fn test_config(batch_size: usize) -> StreamerConfig {
        StreamerConfig {
            batch_size,
            max_latency: Duration::from_millis(20),
            idle_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn spawn_worker<P>(
        transport: crate::transport::channel::ChannelWorkerTransport<i64, i64>,
        processor: P,
        config: StreamerConfig,
    ) -> WorkerHandle
    where
        P: BatchProcessor<Input = i64, Output = i64>,
    {
        let transport = Arc::new(transport);
        let processor = Arc::new(processor);
        WorkerHandle::spawn(move |running| {
            tokio::spawn(async move {
                let _pill = Pill::new();
                run_worker_loop(transport, processor, config, running).await;
            })
        })
    }

    async fn send_items<C: ClientTransport<i64, i64>>(client: &C, task_id: u64, payloads: &[i64]) {
        for (item_index, payload) in payloads.iter().enumerate() {
            client
                .send_request(WorkItem {
                    client_id: Uuid::new_v4(),
                    task_id,
                    item_index,
                    payload: *payload,
                })
                .await
                .unwrap();
        }
    }

    async fn collect_responses<C: ClientTransport<i64, i64>>(
        client: &C,
        count: usize,
    ) -> Vec<ResultItem<i64>> {
        let mut responses = vec![];
        while responses.len() < count {
            if let Some(item) = client
                .recv_response(Duration::from_millis(500))
                .await
                .unwrap()
            {
                responses.push(item);
            }
        }
        responses
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rounds_never_exceed_batch_size() {
        let (client, worker_transport) = channel();
        let processor = Arc::new(RecordingDoubler::new());
        let config = test_config(4);

        // Queue everything before the worker starts so rounds fill up.
        send_items(&client, 0, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).await;

        let transport = Arc::new(worker_transport);
        let mut handle = WorkerHandle::spawn({
            let processor = processor.clone();
            let transport = transport.clone();
            let config = config.clone();
            move |running| {
                tokio::spawn(async move {
                    let _pill = Pill::new();
                    run_worker_loop(transport, processor, config, running).await;
                })
            }
        });

        let responses = collect_responses(&client, 10).await;
        assert_eq!(responses.len(), 10);
        for size in processor.round_sizes.lock().unwrap().iter() {
            assert!(*size <= 4, "round of {size} items exceeds batch_size");
        }
        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sparse_item_dispatched_within_latency_bound() {
        let (client, worker_transport) = channel();
        let config = test_config(32);
        let mut handle = spawn_worker(worker_transport, RecordingDoubler::new(), config);

        let submitted = Instant::now();
        send_items(&client, 0, &[21]).await;
        let response = collect_responses(&client, 1).await.remove(0);

        assert_eq!(response.payload, 42);
        // One pull bound plus scheduling slack, far below a full batch wait.
        assert!(submitted.elapsed() < Duration::from_millis(200));
        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn identity_preserved_on_responses() {
        let (client, worker_transport) = channel();
        let mut handle = spawn_worker(worker_transport, RecordingDoubler::new(), test_config(8));

        send_items(&client, 7, &[5, 6]).await;
        let mut responses = collect_responses(&client, 2).await;
        responses.sort_by_key(|r| r.item_index);

        assert_eq!(responses[0].task_id, 7);
        assert_eq!(responses[0].item_index, 0);
        assert_eq!(responses[0].payload, 10);
        assert_eq!(responses[1].item_index, 1);
        assert_eq!(responses[1].payload, 12);
        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mismatched_output_length_does_not_kill_worker() {
        let (client, worker_transport) = channel();
        let mut handle = spawn_worker(worker_transport, Truncating, test_config(8));

        // This round's outputs are dropped.
        send_items(&client, 0, &[1, 2]).await;
        let got = client.recv_response(Duration::from_millis(100)).await.unwrap();
        assert!(got.is_none(), "mismatched round must not deliver results");

        // The worker must still be draining the queue after the failed
        // round. A second round is consumed the same way.
        send_items(&client, 1, &[3, 4]).await;
        let got = client.recv_response(Duration::from_millis(100)).await.unwrap();
        assert!(got.is_none());

        // Shutdown still completes promptly, proving the loop was alive.
        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_within_bound() {
        let (_client, worker_transport) = channel::<i64, i64>();
        let mut handle = spawn_worker(worker_transport, RecordingDoubler::new(), test_config(4));
        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
