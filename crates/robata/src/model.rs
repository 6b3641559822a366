use async_trait::async_trait;

use crate::error::Result;

/// The batch-processing collaborator for in-process and broker workers.
///
/// Implementations receive the ordered payloads of one round and must
/// return exactly one output per input, in the same order. Workers verify
/// the length contract at runtime; a mismatch fails that round's delivery.
///
/// # Example
///
/// ```ignore
/// use robata::BatchProcessor;
/// use async_trait::async_trait;
///
/// struct Doubler;
///
/// #[async_trait]
/// impl BatchProcessor for Doubler {
///     type Input = i64;
///     type Output = i64;
///
///     async fn process(&self, batch: Vec<i64>) -> Vec<i64> {
///         batch.into_iter().map(|v| v * 2).collect()
///     }
/// }
/// ```
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Process one round of payloads, returning one output per input.
    async fn process(&self, batch: Vec<Self::Input>) -> Vec<Self::Output>;
}

/// A heavyweight model owned by a single pooled worker thread.
///
/// Pooled workers each load their own instance after spawning, so the load
/// happens on the worker's thread with the worker's device id passed in
/// explicitly. `process` takes `&mut self` because the instance is never
/// shared between workers.
pub trait ManagedModel: Sized + Send + 'static {
    /// Initialization arguments forwarded to every worker's `load`.
    type Config: Clone + Send + Sync + 'static;
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Load the model, pinned to `device_id` when one is assigned.
    fn load(config: &Self::Config, device_id: Option<usize>) -> Result<Self>;

    /// Process one round of payloads, returning one output per input.
    fn process(&mut self, batch: Vec<Self::Input>) -> Vec<Self::Output>;
}
