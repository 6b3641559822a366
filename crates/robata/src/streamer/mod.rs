//! Streamer front-ends.
//!
//! All variants share [`StreamerCore`]: task-id assignment, registration
//! in the pending-task table, per-item submission, and the background
//! result collector. The variants differ only in the transport they are
//! wired to and in the worker lifecycles they own.

mod threaded;
mod pooled;
#[cfg(feature = "redis")]
mod redis;

pub use pooled::PooledStreamer;
#[cfg(feature = "redis")]
pub use redis::{RedisStreamer, RedisWorker, spawn_redis_workers};
pub use threaded::ThreadedStreamer;

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::collector::run_collector_loop;
use crate::communication::{Pill, WorkItem};
use crate::config::StreamerConfig;
use crate::error::{Error, Result};
use crate::future::{TaskFuture, TaskTable};
use crate::transport::ClientTransport;
use crate::worker::WorkerHandle;

/// Transport-agnostic streamer internals.
pub(crate) struct StreamerCore<I, O, T>
where
    T: ClientTransport<I, O>,
{
    client_id: Uuid,
    next_task_id: AtomicU64,
    table: Arc<TaskTable<O>>,
    transport: Arc<T>,
    worker_timeout: Duration,
    // Held for its running flag; dropping the core stops the collector.
    _collector: WorkerHandle,
    _marker: PhantomData<fn(I)>,
}

impl<I, O, T> StreamerCore<I, O, T>
where
    I: Send + 'static,
    O: Send + 'static,
    T: ClientTransport<I, O>,
{
    /// Wire a core to `transport` and start its result collector.
    pub(crate) fn new(transport: Arc<T>, config: &StreamerConfig, client_id: Uuid) -> Self {
        let table = Arc::new(TaskTable::new());
        let collector = WorkerHandle::spawn({
            let transport = transport.clone();
            let table = table.clone();
            let config = config.clone();
            move |running| {
                tokio::spawn(async move {
                    let _pill = Pill::new();
                    run_collector_loop::<I, O, T>(transport, table, config, running).await;
                })
            }
        });

        Self {
            client_id,
            next_task_id: AtomicU64::new(0),
            table,
            transport,
            worker_timeout: config.worker_timeout,
            _collector: collector,
            _marker: PhantomData,
        }
    }

    /// Split `batch` into individually tracked work items and push them to
    /// the transport. Returns the task future immediately.
    ///
    /// The future is registered in the pending-task table before the first
    /// item is submitted, so a fast worker response can never race the
    /// registration.
    pub(crate) async fn submit(&self, batch: Vec<I>) -> Result<TaskFuture<O>> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let future = TaskFuture::register(self.table.clone(), task_id, batch.len());

        for (item_index, payload) in batch.into_iter().enumerate() {
            self.transport
                .send_request(WorkItem {
                    client_id: self.client_id,
                    task_id,
                    item_index,
                    payload,
                })
                .await?;
        }
        Ok(future)
    }

    /// Submit and block on the result, re-ordered by item index.
    pub(crate) async fn predict(&self, batch: Vec<I>) -> Result<Vec<O>> {
        let expected = batch.len();
        let future = self.submit(batch).await?;
        let outputs = future.result(self.worker_timeout).await?;
        if outputs.len() != expected {
            return Err(Error::BatchSizeMismatch {
                expected,
                got: outputs.len(),
            });
        }
        Ok(outputs)
    }
}
