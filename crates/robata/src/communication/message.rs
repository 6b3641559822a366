use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One element of a caller's batch in flight to a worker.
///
/// The `(client_id, task_id, item_index)` triple is the item's identity:
/// `client_id` routes responses back to the right streamer instance in the
/// broker-backed topology, `task_id` identifies the caller's batch, and
/// `item_index` is the element's position within that batch (always
/// starting at 0 per task), used to restore output ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem<I> {
    pub client_id: Uuid,
    pub task_id: u64,
    pub item_index: usize,
    pub payload: I,
}

/// One worker-produced output in flight back to a streamer.
///
/// Carries exactly the identity needed to route the payload into the right
/// task future and slot it at the right position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem<O> {
    pub task_id: u64,
    pub item_index: usize,
    pub payload: O,
}
