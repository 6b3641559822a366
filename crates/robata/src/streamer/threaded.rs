//! In-process streamer: workers run as tokio tasks in the same process.
//!
//! The lowest-latency topology, with no isolation between the batch
//! function and the caller. Suited to cheap or async batch functions that
//! can share one model instance behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::communication::Pill;
use crate::config::StreamerConfig;
use crate::error::Result;
use crate::future::TaskFuture;
use crate::model::BatchProcessor;
use crate::streamer::StreamerCore;
use crate::transport::channel::{ChannelClientTransport, channel};
use crate::worker::{WorkerHandle, run_worker_loop};

pub struct ThreadedStreamer<P>
where
    P: BatchProcessor,
{
    core: StreamerCore<P::Input, P::Output, ChannelClientTransport<P::Input, P::Output>>,
    workers: Vec<WorkerHandle>,
    worker_timeout: Duration,
}

impl<P> ThreadedStreamer<P>
where
    P: BatchProcessor,
{
    /// Spawn `config.worker_num` worker tasks around `processor` and wire
    /// a streamer to them. Must be called within a tokio runtime.
    pub fn new(processor: P, config: StreamerConfig) -> Self {
        let processor = Arc::new(processor);
        let (client_transport, worker_transport) = channel();
        let worker_transport = Arc::new(worker_transport);

        let workers = (0..config.worker_num.max(1))
            .map(|_| {
                let transport = worker_transport.clone();
                let processor = processor.clone();
                let config = config.clone();
                WorkerHandle::spawn(move |running| {
                    tokio::spawn(async move {
                        let _pill = Pill::new();
                        run_worker_loop(transport, processor, config, running).await;
                    })
                })
            })
            .collect();

        let core = StreamerCore::new(Arc::new(client_transport), &config, Uuid::new_v4());
        Self {
            core,
            workers,
            worker_timeout: config.worker_timeout,
        }
    }

    /// Non-blocking submission; returns a future resolving to the ordered
    /// outputs for `batch`.
    pub async fn submit(&self, batch: Vec<P::Input>) -> Result<TaskFuture<P::Output>> {
        self.core.submit(batch).await
    }

    /// Submit `batch` and wait for its outputs, ordered to match the
    /// input items.
    pub async fn predict(&self, batch: Vec<P::Input>) -> Result<Vec<P::Output>> {
        self.core.predict(batch).await
    }

    /// Cooperatively stop all owned worker tasks, waiting up to
    /// `worker_timeout` for each.
    pub async fn destroy_workers(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.shutdown(self.worker_timeout).await?;
        }
        info!("workers destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Instant;

    struct Doubler;

    #[async_trait]
    impl BatchProcessor for Doubler {
        type Input = i64;
        type Output = i64;

        async fn process(&self, batch: Vec<i64>) -> Vec<i64> {
            batch.into_iter().map(|v| v * 2).collect()
        }
    }

    /// Never completes within any test bound.
    struct Stalling;

    #[async_trait]
    impl BatchProcessor for Stalling {
        type Input = i64;
        type Output = i64;

        async fn process(&self, batch: Vec<i64>) -> Vec<i64> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            batch
        }
    }

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

    fn fast_config() -> StreamerConfig {
        StreamerConfig {
            batch_size: 8,
            max_latency: Duration::from_millis(50),
            worker_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn predict_preserves_input_order() {
        let streamer = ThreadedStreamer::new(Doubler, fast_config());
        let outputs = streamer.predict(vec![3, 1, 2]).await.unwrap();
        assert_eq!(outputs, vec![6, 2, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_batch_returns_immediately() {
        let streamer = ThreadedStreamer::new(Doubler, fast_config());
        let started = Instant::now();
        let outputs = streamer.predict(vec![]).await.unwrap();
        assert!(outputs.is_empty());
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_coalesce_without_crosstalk() {
        let streamer = Arc::new(ThreadedStreamer::new(Doubler, fast_config()));
        let started = Instant::now();

        let first = {
            let streamer = streamer.clone();
            tokio::spawn(async move { streamer.predict(vec![1, 2, 3]).await })
        };
        let second = {
            let streamer = streamer.clone();
            tokio::spawn(async move { streamer.predict(vec![10, 20]).await })
        };

        assert_eq!(first.await.unwrap().unwrap(), vec![2, 4, 6]);
        assert_eq!(second.await.unwrap().unwrap(), vec![20, 40]);
        // Both tasks ride the same batching window rather than two
        // sequential worker timeouts.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ordering_survives_fragmented_rounds() {
        let config = StreamerConfig {
            batch_size: 2,
            max_latency: Duration::from_millis(10),
            worker_num: 3,
            worker_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let streamer = ThreadedStreamer::new(Doubler, config);

        let inputs: Vec<i64> = (0..20).collect();
        let expected: Vec<i64> = inputs.iter().map(|v| v * 2).collect();
        let outputs = streamer.predict(inputs).await.unwrap();
        assert_eq!(outputs, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stalled_batch_function_times_out() {
        let config = StreamerConfig {
            worker_timeout: Duration::from_millis(300),
            max_latency: Duration::from_millis(20),
            ..Default::default()
        };
        let streamer = ThreadedStreamer::new(Stalling, config);

        let started = Instant::now();
        let err = streamer.predict(vec![1]).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, crate::Error::Timeout { .. }));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_returns_a_pollable_future() {
        let streamer = ThreadedStreamer::new(Doubler, fast_config());
        let future = streamer.submit(vec![4, 5]).await.unwrap();
        let outputs = future.result(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outputs, vec![8, 10]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mismatch_only_affects_the_malformed_round() {
        let config = StreamerConfig {
            batch_size: 4,
            max_latency: Duration::from_millis(20),
            worker_timeout: Duration::from_millis(400),
            ..Default::default()
        };
        let streamer = ThreadedStreamer::new(Truncating, config);

        let err = streamer.predict(vec![1, 2]).await.unwrap_err();
        assert!(matches!(err, crate::Error::Timeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn destroy_workers_completes() {
        let mut streamer = ThreadedStreamer::new(Doubler, fast_config());
        streamer.predict(vec![1]).await.unwrap();
        streamer.destroy_workers().await.unwrap();
    }
}
