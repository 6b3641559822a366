//! Background result collection.
//!
//! Each streamer runs exactly one collector loop for its lifetime. The
//! loop is the sole writer into task futures: it drains the response
//! transport and appends each result into the matching task's buffer.
//! Results for unknown task ids (evicted after a timeout, or abandoned)
//! are dropped with a warning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::config::StreamerConfig;
use crate::future::TaskTable;
use crate::transport::ClientTransport;

pub(crate) async fn run_collector_loop<I, O, T>(
    transport: Arc<T>,
    table: Arc<TaskTable<O>>,
    config: StreamerConfig,
    running: Arc<AtomicBool>,
) where
    I: Send + 'static,
    O: Send + 'static,
    T: ClientTransport<I, O>,
{
    info!("result collector started");
    while running.load(Ordering::SeqCst) {
        match transport.recv_response(config.poll_interval).await {
            Ok(Some(item)) => match table.get(item.task_id) {
                Some(state) => state.append_result(item.item_index, item.payload),
                None => {
                    warn!(task_id = item.task_id, "dropping result for unknown task");
                }
            },
            Ok(None) => tokio::time::sleep(config.idle_backoff).await,
            Err(crate::error::Error::ChannelClosed) => {
                debug!("response transport closed, collector exiting");
                break;
            }
            Err(e) => {
                // A collector that stops silently would starve every
                // future of this streamer; escalate instead.
                error!(error = %e, "result collector transport failure");
                panic!("result collector failed: {e}");
            }
        }
    }
    info!("result collector stopped");
}
