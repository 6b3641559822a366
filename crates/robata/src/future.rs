use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Shared per-task state: the result buffer and the completion signal.
///
/// The collector is the sole writer into `outputs`; the consuming side
/// only reads it after the watch channel has flipped to `true`, so the
/// buffer is never observed mid-write.
pub(crate) struct TaskState<O> {
    expected: usize,
    outputs: Mutex<Vec<(usize, O)>>,
    done_tx: watch::Sender<bool>,
}

impl<O> TaskState<O> {
    fn new(expected: usize) -> (Arc<Self>, watch::Receiver<bool>) {
        let (done_tx, done_rx) = watch::channel(expected == 0);
        let state = Arc::new(Self {
            expected,
            outputs: Mutex::new(Vec::with_capacity(expected)),
            done_tx,
        });
        (state, done_rx)
    }

    /// Append one `(item_index, payload)` pair. Flips the completion
    /// signal once the buffer holds every expected output. Accumulation
    /// order is arbitrary; sorting happens at consumption time.
    pub(crate) fn append_result(&self, item_index: usize, payload: O) {
        let mut outputs = lock_unpoisoned(&self.outputs);
        outputs.push((item_index, payload));
        if outputs.len() >= self.expected {
            let _ = self.done_tx.send(true);
        }
    }
}

/// The pending-task table: `task_id` → in-flight task state.
///
/// Shared between the submitting path and the result collector. The
/// streamer side owns insertion and removal; the collector only looks up
/// entries to append results and never removes them. A task must be
/// registered here before any of its work items reach the transport, so a
/// fast worker response can never arrive before its future exists.
pub(crate) struct TaskTable<O> {
    inner: Mutex<HashMap<u64, Arc<TaskState<O>>>>,
}

impl<O> TaskTable<O> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, task_id: u64) -> Option<Arc<TaskState<O>>> {
        lock_unpoisoned(&self.inner).get(&task_id).cloned()
    }

    fn insert(&self, task_id: u64, state: Arc<TaskState<O>>) {
        lock_unpoisoned(&self.inner).insert(task_id, state);
    }

    fn remove(&self, task_id: u64) {
        lock_unpoisoned(&self.inner).remove(&task_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }
}

// A poisoned lock only means some thread panicked mid-access; the data is
// plain pushes/removes and stays usable.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Completion handle for one submitted batch.
///
/// Returned by `submit`; resolves once all `expected` outputs have been
/// collected. Consuming the future (or dropping it, or timing out) removes
/// the task from the pending-task table, so abandoned tasks do not
/// accumulate over the life of the process.
pub struct TaskFuture<O> {
    task_id: u64,
    state: Arc<TaskState<O>>,
    done_rx: watch::Receiver<bool>,
    table: Arc<TaskTable<O>>,
    consumed: bool,
}

impl<O> TaskFuture<O> {
    /// Create a task future and register it in `table`. Zero-sized tasks
    /// complete immediately and are never registered, since no work items
    /// will be dispatched for them.
    pub(crate) fn register(table: Arc<TaskTable<O>>, task_id: u64, expected: usize) -> Self {
        let (state, done_rx) = TaskState::new(expected);
        if expected > 0 {
            table.insert(task_id, state.clone());
        }
        Self {
            task_id,
            state,
            done_rx,
            table,
            consumed: false,
        }
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Non-blocking poll of the completion signal.
    pub fn done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait up to `timeout` for every output, then return the payloads
    /// ordered by item index.
    ///
    /// On expiry the task is evicted from the pending-task table and
    /// [`Error::Timeout`] is returned; late worker results for it are
    /// dropped by the collector.
    pub async fn result(mut self, timeout: Duration) -> Result<Vec<O>> {
        self.consumed = true;

        let done_rx = &mut self.done_rx;
        let wait = async {
            while !*done_rx.borrow_and_update() {
                if done_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        let finished = tokio::time::timeout(timeout, wait).await.is_ok();
        self.table.remove(self.task_id);

        if !finished {
            return Err(Error::Timeout {
                task_id: self.task_id,
            });
        }

        let mut outputs = std::mem::take(&mut *lock_unpoisoned(&self.state.outputs));
        outputs.sort_by_key(|(item_index, _)| *item_index);
        Ok(outputs.into_iter().map(|(_, payload)| payload).collect())
    }
}

impl<O> Drop for TaskFuture<O> {
    /// A future abandoned without calling `result` unregisters its task,
    /// otherwise the table entry would live until process restart.
    fn drop(&mut self) {
        if !self.consumed {
            self.table.remove(self.task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<TaskTable<i32>> {
        Arc::new(TaskTable::new())
    }

    #[tokio::test]
    async fn results_sorted_by_item_index() {
        let table = table();
        let future = TaskFuture::register(table.clone(), 0, 3);
        let state = table.get(0).unwrap();

        state.append_result(2, 30);
        state.append_result(0, 10);
        state.append_result(1, 20);

        assert!(future.done());
        let outputs = future.result(Duration::from_millis(10)).await.unwrap();
        assert_eq!(outputs, vec![10, 20, 30]);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn empty_task_completes_immediately() {
        let table = table();
        let future = TaskFuture::register(table.clone(), 0, 0);
        assert!(future.done());
        assert_eq!(table.len(), 0);
        let outputs = future.result(Duration::from_millis(1)).await.unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn not_done_until_all_results_arrive() {
        let table = table();
        let future = TaskFuture::register(table.clone(), 5, 2);
        let state = table.get(5).unwrap();

        state.append_result(0, 1);
        assert!(!future.done());
        state.append_result(1, 2);
        assert!(future.done());
    }

    #[tokio::test]
    async fn timeout_identifies_task_and_evicts_it() {
        let table = table();
        let future = TaskFuture::register(table.clone(), 9, 1);
        assert_eq!(table.len(), 1);

        let err = future.result(Duration::from_millis(20)).await.unwrap_err();
        match err {
            Error::Timeout { task_id } => assert_eq!(task_id, 9),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn dropped_future_unregisters_task() {
        let table = table();
        let future = TaskFuture::register(table.clone(), 3, 2);
        assert_eq!(table.len(), 1);
        drop(future);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn result_unblocks_on_late_completion() {
        let table = table();
        let future = TaskFuture::register(table.clone(), 1, 1);
        let state = table.get(1).unwrap();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state.append_result(0, 42);
        });

        let outputs = future.result(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outputs, vec![42]);
        writer.await.unwrap();
    }
}
