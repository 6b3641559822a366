use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs shared by every streamer variant.
///
/// The defaults mirror the behavior of a single worker with a 100ms
/// batching window and a 20s caller-side result bound, which is a sensible
/// starting point for model inference workloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Maximum number of items handed to the batch function per round.
    pub batch_size: usize,

    /// Bound on how long a worker waits for each item, and on the total
    /// accumulation time of one round. No item waits longer than this for
    /// its round to close.
    pub max_latency: Duration,

    /// Number of workers draining the shared request queue.
    pub worker_num: usize,

    /// Bound on `predict`/`result`: how long a caller waits for all of a
    /// task's outputs before receiving [`Error::Timeout`].
    ///
    /// [`Error::Timeout`]: crate::Error::Timeout
    pub worker_timeout: Duration,

    /// Accelerator ids assigned to workers round-robin. `None` leaves
    /// device selection to the model.
    pub device_ids: Option<Vec<usize>>,

    /// Whether constructors should block until every worker has finished
    /// loading its model. Callers that skip the wait accept that early
    /// requests may queue until workers come up.
    pub wait_for_ready: bool,

    /// Sleep inserted after a round that collected zero items. A plain
    /// backoff works identically across all transport kinds; tune it to
    /// trade idle CPU against wakeup latency.
    pub idle_backoff: Duration,

    /// Bound on each blocking read the result collector performs, so the
    /// stop signal is observed promptly.
    pub poll_interval: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_latency: Duration::from_millis(100),
            worker_num: 1,
            worker_timeout: Duration::from_secs(20),
            device_ids: None,
            wait_for_ready: false,
            idle_backoff: Duration::from_millis(1),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl StreamerConfig {
    /// Device id for the worker at `index`, assigned round-robin over
    /// `device_ids`.
    pub fn device_for(&self, index: usize) -> Option<usize> {
        match &self.device_ids {
            Some(ids) if !ids.is_empty() => Some(ids[index % ids.len()]),
            _ => None,
        }
    }
}
