//! # Robata
//!
//! A micro-batching work streamer for batched model inference.
//!
//! ## Overview
//!
//! Robata accepts a continuous stream of individual work items from many
//! concurrent callers, groups them into batches under a size/latency
//! budget, dispatches each batch to a pool of workers running an expensive
//! batch function (typically model inference), and hands every caller back
//! exactly the outputs matching their submitted items, in their original
//! order.
//!
//! Key components:
//!
//! - Streamer front-ends exposing a blocking `predict` and a non-blocking
//!   `submit` returning a [`TaskFuture`]
//! - Batch workers that assemble rounds of up to `batch_size` items,
//!   closing each round within `max_latency`
//! - A background result collector per streamer, routing each output back
//!   into the right task by id
//! - Queue-like transports decoupling the two sides
//!
//! ## Topologies
//!
//! The same external contract is served over three transports, selected at
//! construction time:
//!
//! - [`ThreadedStreamer`] - workers as in-process tokio tasks over tokio
//!   queues; lowest latency, no isolation
//! - [`PooledStreamer`] - workers as dedicated OS threads, each owning its
//!   own model instance optionally pinned to an accelerator id
//! - `RedisStreamer` (feature `redis`) - workers in separate processes,
//!   possibly on other hosts, coupled only through a broker list and a
//!   per-client pub/sub channel
//!
//! ## Guarantees
//!
//! Within one task, outputs are re-ordered by item index before being
//! returned, regardless of how workers fragment or interleave rounds.
//! Across tasks no ordering is promised: concurrent `predict` calls may
//! complete in either order, and their items may share a physical batch
//! without ever cross-contaminating results.
//!
//! ## Features
//!
//! - **redis** - enables the broker-backed streamer and worker

mod collector;
mod communication;
mod config;
mod error;
mod future;
mod model;
mod streamer;
mod worker;

pub mod transport;

pub use communication::{ResultItem, WorkItem};
pub use config::StreamerConfig;
pub use error::{Error, Result};
pub use future::TaskFuture;
pub use model::{BatchProcessor, ManagedModel};
pub use streamer::{PooledStreamer, ThreadedStreamer};
pub use worker::WorkerHandle;

#[cfg(feature = "redis")]
pub use streamer::{RedisStreamer, RedisWorker, spawn_redis_workers};
