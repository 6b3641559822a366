//! Broker-backed streamer and worker.
//!
//! Clients and workers only share a redis instance: the streamer pushes
//! work items to a list keyed by `prefix`, workers on any host drain it
//! and publish results to the originating client's pub/sub channel. The
//! streamer owns no worker lifecycles; `destroy_workers` is a no-op and
//! workers are stopped wherever they were spawned.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::communication::Pill;
use crate::config::StreamerConfig;
use crate::error::Result;
use crate::future::TaskFuture;
use crate::model::BatchProcessor;
use crate::streamer::StreamerCore;
use crate::transport::redis::{RedisClientTransport, RedisWorkerTransport};
use crate::worker::{WorkerHandle, run_worker_loop};

pub struct RedisStreamer<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + Sync + 'static,
{
    core: StreamerCore<I, O, RedisClientTransport<I, O>>,
}

impl<I, O> RedisStreamer<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + Sync + 'static,
{
    /// Connect a streamer to the broker at `url`. `prefix` must match the
    /// one the workers were started with.
    pub async fn connect(url: &str, prefix: &str, config: StreamerConfig) -> Result<Self> {
        let client_id = Uuid::new_v4();
        let transport = RedisClientTransport::connect(url, prefix, client_id).await?;
        Ok(Self {
            core: StreamerCore::new(Arc::new(transport), &config, client_id),
        })
    }

    /// Non-blocking submission; returns a future resolving to the ordered
    /// outputs for `batch`.
    pub async fn submit(&self, batch: Vec<I>) -> Result<TaskFuture<O>> {
        self.core.submit(batch).await
    }

    /// Submit `batch` and wait for its outputs, ordered to match the
    /// input items.
    pub async fn predict(&self, batch: Vec<I>) -> Result<Vec<O>> {
        self.core.predict(batch).await
    }

    /// Broker workers are independent processes with no owned lifecycle
    /// here; stopping them is the job of whichever process spawned them.
    pub fn destroy_workers(&self) -> Result<()> {
        Ok(())
    }
}

/// A broker-polling batch worker, typically run in a separate process
/// (possibly on another host) from the streamers it serves.
pub struct RedisWorker<P>
where
    P: BatchProcessor,
    P::Input: DeserializeOwned + Sync,
    P::Output: Serialize + Sync,
{
    transport: Arc<RedisWorkerTransport<P::Input, P::Output>>,
    processor: Arc<P>,
    config: StreamerConfig,
}

impl<P> RedisWorker<P>
where
    P: BatchProcessor,
    P::Input: DeserializeOwned + Sync,
    P::Output: Serialize + Sync,
{
    pub async fn connect(
        processor: P,
        url: &str,
        prefix: &str,
        config: StreamerConfig,
    ) -> Result<Self> {
        let transport = RedisWorkerTransport::connect(url, prefix).await?;
        Ok(Self {
            transport: Arc::new(transport),
            processor: Arc::new(processor),
            config,
        })
    }

    /// Start the worker loop as a background task and return its handle.
    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle::spawn(move |running| {
            tokio::spawn(async move {
                let _pill = Pill::new();
                run_worker_loop(self.transport, self.processor, self.config, running).await;
            })
        })
    }

    /// Run the worker loop on the current task until the transport fails.
    /// Intended for dedicated worker processes whose entrypoint has
    /// nothing else to do.
    pub async fn run(self) {
        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        run_worker_loop(self.transport, self.processor, self.config, running).await;
    }
}

/// Spawn `config.worker_num` broker-polling workers, building each one's
/// processor through `factory` with its round-robin device id. Returns the
/// worker handles for cooperative shutdown.
pub async fn spawn_redis_workers<P, F>(
    factory: F,
    url: &str,
    prefix: &str,
    config: StreamerConfig,
) -> Result<Vec<WorkerHandle>>
where
    P: BatchProcessor,
    P::Input: DeserializeOwned + Sync,
    P::Output: Serialize + Sync,
    F: Fn(Option<usize>) -> P,
{
    let mut handles = Vec::with_capacity(config.worker_num.max(1));
    for index in 0..config.worker_num.max(1) {
        let processor = factory(config.device_for(index));
        let worker = RedisWorker::connect(processor, url, prefix, config.clone()).await?;
        handles.push(worker.spawn());
    }
    Ok(handles)
}
