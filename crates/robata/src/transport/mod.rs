//! Queue-like primitives connecting streamers to workers.
//!
//! A transport is a pair of directed lanes: work items flow from a
//! streamer to a pool of workers, results flow back. Three implementations
//! cover the supported topologies:
//!
//! * [`channel`] - in-process tokio queues for workers running as tasks
//! * [`pooled`] - an MPMC queue shared by dedicated worker threads
//! * [`redis`] - a broker-backed list plus per-client pub/sub channel
//!
//! The transport is an implementation detail of each streamer variant;
//! callers only ever observe it through configuration.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::communication::{ResultItem, WorkItem};
use crate::error::Result;

pub mod channel;
pub mod pooled;
#[cfg(feature = "redis")]
pub mod redis;

/// The streamer-facing half of a transport: submit work, drain results.
#[async_trait]
pub trait ClientTransport<I, O>: Send + Sync + 'static {
    /// Push one work item to the shared request lane.
    async fn send_request(&self, item: WorkItem<I>) -> Result<()>;

    /// Pull the next result addressed to this client, waiting at most
    /// `timeout`. `Ok(None)` means the wait elapsed with nothing to read.
    async fn recv_response(&self, timeout: Duration) -> Result<Option<ResultItem<O>>>;
}

/// The worker-facing half of a transport: drain work, publish results.
#[async_trait]
pub trait WorkerTransport<I, O>: Send + Sync + 'static {
    /// Pull the next work item, waiting at most `timeout`. `Ok(None)`
    /// means the wait elapsed with nothing to read.
    async fn recv_request(&self, timeout: Duration) -> Result<Option<WorkItem<I>>>;

    /// Publish one result to the client identified by `client_id`.
    async fn send_response(&self, client_id: Uuid, item: ResultItem<O>) -> Result<()>;
}
