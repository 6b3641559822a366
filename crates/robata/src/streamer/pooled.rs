//! Worker-pool streamer: each worker is a dedicated OS thread owning its
//! own model instance, optionally pinned to an accelerator.
//!
//! This is the topology for heavyweight, CPU/GPU-bound batch functions
//! that need one model instance per device. Workers share a single MPMC
//! request queue and load their model on their own thread, with the device
//! id passed explicitly through the spawn call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{error, info};
use uuid::Uuid;

use crate::communication::Pill;
use crate::config::StreamerConfig;
use crate::error::{Error, Result};
use crate::future::TaskFuture;
use crate::model::ManagedModel;
use crate::streamer::StreamerCore;
use crate::transport::pooled::{PooledClientTransport, pooled};
use crate::worker::run_blocking_worker_loop;

/// Owned handle to one pooled worker thread.
struct PooledWorker {
    stop: Arc<AtomicBool>,
    ready_rx: channel::Receiver<std::result::Result<(), String>>,
    // Disconnects when the worker function returns; used for the bounded
    // shutdown wait.
    exit_rx: channel::Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}

pub struct PooledStreamer<M>
where
    M: ManagedModel,
{
    core: StreamerCore<M::Input, M::Output, PooledClientTransport<M::Input, M::Output>>,
    workers: Vec<PooledWorker>,
    worker_timeout: Duration,
}

impl<M> PooledStreamer<M>
where
    M: ManagedModel,
{
    /// Spawn `config.worker_num` worker threads, each loading its own
    /// model from `model_config`, and wire a streamer to them.
    ///
    /// With `config.wait_for_ready` set, blocks until every worker has
    /// loaded (bounded by `worker_timeout`). Must be called within a tokio
    /// runtime; the ready wait blocks the calling thread.
    pub fn new(model_config: M::Config, config: StreamerConfig) -> Result<Self> {
        let (client_transport, queue) = pooled();

        let mut workers = Vec::with_capacity(config.worker_num.max(1));
        for index in 0..config.worker_num.max(1) {
            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = channel::bounded(1);
            let (exit_tx, exit_rx) = channel::bounded::<()>(0);
            let device_id = config.device_for(index);

            let thread = thread::Builder::new()
                .name(format!("stream-worker-{index}"))
                .spawn({
                    let queue = queue.clone();
                    let model_config = model_config.clone();
                    let worker_config = config.clone();
                    let stop = stop.clone();
                    move || {
                        let _pill = Pill::new();
                        let _exit = exit_tx;
                        info!(worker = index, ?device_id, "loading model");
                        let mut model = match M::load(&model_config, device_id) {
                            Ok(model) => {
                                let _ = ready_tx.send(Ok(()));
                                model
                            }
                            Err(e) => {
                                error!(worker = index, error = %e, "model load failed");
                                let _ = ready_tx.send(Err(e.to_string()));
                                return;
                            }
                        };
                        run_blocking_worker_loop(&queue, &mut model, &worker_config, &stop);
                    }
                })
                .map_err(|e| Error::WorkerInit {
                    message: format!("failed to spawn worker thread: {e}"),
                })?;

            workers.push(PooledWorker {
                stop,
                ready_rx,
                exit_rx,
                thread: Some(thread),
            });
        }

        let streamer = Self {
            core: StreamerCore::new(Arc::new(client_transport), &config, Uuid::new_v4()),
            workers,
            worker_timeout: config.worker_timeout,
        };
        if config.wait_for_ready {
            streamer.wait_for_workers(config.worker_timeout)?;
        }
        Ok(streamer)
    }

    /// Block until every worker has finished loading its model, bounded by
    /// `timeout` overall.
    pub fn wait_for_workers(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for (index, worker) in self.workers.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.ready_rx.recv_timeout(remaining) {
                Ok(Ok(())) => info!(worker = index, "worker ready"),
                Ok(Err(message)) => return Err(Error::WorkerInit { message }),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::WorkerReadyTimeout { timeout });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::WorkerInit {
                        message: format!("worker {index} exited before becoming ready"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Non-blocking submission; returns a future resolving to the ordered
    /// outputs for `batch`.
    pub async fn submit(&self, batch: Vec<M::Input>) -> Result<TaskFuture<M::Output>> {
        self.core.submit(batch).await
    }

    /// Submit `batch` and wait for its outputs, ordered to match the
    /// input items.
    pub async fn predict(&self, batch: Vec<M::Input>) -> Result<Vec<M::Output>> {
        self.core.predict(batch).await
    }

    /// Cooperatively stop all worker threads. Signals every worker first,
    /// then waits up to `worker_timeout` for each to exit its in-flight
    /// round; a worker that fails to stop is a hard error.
    pub fn destroy_workers(&mut self) -> Result<()> {
        for worker in &self.workers {
            worker.stop.store(true, Ordering::SeqCst);
        }
        for worker in &mut self.workers {
            match worker.exit_rx.recv_timeout(self.worker_timeout) {
                Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::WorkerShutdownTimeout {
                        timeout: self.worker_timeout,
                    });
                }
                Ok(()) => unreachable!("exit channel never carries messages"),
            }
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
        info!("workers destroyed");
        Ok(())
    }
}

impl<M> Drop for PooledStreamer<M>
where
    M: ManagedModel,
{
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.stop.store(true, Ordering::SeqCst);
        }
    }
}
