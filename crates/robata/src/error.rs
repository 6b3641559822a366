use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by streamers, workers and transports.
#[derive(Debug, Error)]
pub enum Error {
    /// The worker pool did not produce every output for a task before
    /// `worker_timeout` elapsed. Recoverable by the caller (retry or fail
    /// the request upstream).
    #[error("task {task_id} timed out waiting for batch results")]
    Timeout { task_id: u64 },

    /// The batch function returned a different number of outputs than it
    /// was given inputs. This is a defect in the batch function, not a
    /// recoverable runtime condition.
    #[error("batch function returned {got} outputs for {expected} inputs")]
    BatchSizeMismatch { expected: usize, got: usize },

    /// A worker did not observe its stop signal and exit within the bound
    /// given to `destroy_workers`. A hung worker may still be holding a
    /// device and must be made visible to the owner.
    #[error("worker failed to stop within {timeout:?}")]
    WorkerShutdownTimeout { timeout: Duration },

    /// A pooled worker failed to load its model during startup.
    #[error("worker failed to initialize: {message}")]
    WorkerInit { message: String },

    /// A worker did not signal readiness within the wait bound.
    #[error("worker failed to become ready within {timeout:?}")]
    WorkerReadyTimeout { timeout: Duration },

    /// The peer end of an in-process transport queue is gone.
    #[error("transport channel closed")]
    ChannelClosed,

    /// Broker I/O failure, surfaced to whichever side attempted the call.
    #[cfg(feature = "redis")]
    #[error("redis transport error")]
    Redis(#[from] redis::RedisError),

    /// A broker message could not be encoded or decoded.
    #[cfg(feature = "redis")]
    #[error("message codec error")]
    Codec(#[from] serde_json::Error),
}
