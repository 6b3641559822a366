//! Transport for the dedicated-thread worker pool.
//!
//! Requests travel over a crossbeam MPMC channel so that N worker threads
//! can block on the same queue without extra locking. Responses come back
//! over a tokio unbounded queue, whose sender side is callable from plain
//! threads while the collector awaits the receiver.

use std::time::Duration;

use async_trait::async_trait;
use crossbeam::channel::{self, RecvTimeoutError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::Mutex;

use crate::communication::{ResultItem, WorkItem};
use crate::error::{Error, Result};
use crate::transport::ClientTransport;

/// Build a connected client transport / worker queue pair.
pub fn pooled<I, O>() -> (PooledClientTransport<I, O>, PooledWorkerQueue<I, O>) {
    let (request_tx, request_rx) = channel::unbounded();
    let (response_tx, response_rx) = unbounded_channel();
    (
        PooledClientTransport {
            request_tx,
            response_rx: Mutex::new(response_rx),
        },
        PooledWorkerQueue {
            request_rx,
            response_tx,
        },
    )
}

pub struct PooledClientTransport<I, O> {
    request_tx: channel::Sender<WorkItem<I>>,
    response_rx: Mutex<UnboundedReceiver<ResultItem<O>>>,
}

/// Blocking endpoint handed to each pooled worker thread.
pub struct PooledWorkerQueue<I, O> {
    request_rx: channel::Receiver<WorkItem<I>>,
    response_tx: UnboundedSender<ResultItem<O>>,
}

impl<I, O> Clone for PooledWorkerQueue<I, O> {
    fn clone(&self) -> Self {
        Self {
            request_rx: self.request_rx.clone(),
            response_tx: self.response_tx.clone(),
        }
    }
}

impl<I, O> PooledWorkerQueue<I, O> {
    /// Blocking pull with a bound, so stop signals are observed promptly.
    pub fn recv_request(&self, timeout: Duration) -> Result<Option<WorkItem<I>>> {
        match self.request_rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    pub fn send_response(&self, item: ResultItem<O>) -> Result<()> {
        self.response_tx.send(item).map_err(|_| Error::ChannelClosed)
    }
}

#[async_trait]
impl<I, O> ClientTransport<I, O> for PooledClientTransport<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn send_request(&self, item: WorkItem<I>) -> Result<()> {
        // Unbounded send never blocks the async caller.
        self.request_tx.send(item).map_err(|_| Error::ChannelClosed)
    }

    async fn recv_response(&self, timeout: Duration) -> Result<Option<ResultItem<O>>> {
        let mut receiver = self.response_rx.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(Error::ChannelClosed),
            Ok(Some(item)) => Ok(Some(item)),
        }
    }
}
