//! In-process transport backed by tokio mpsc queues.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::communication::{ResultItem, WorkItem};
use crate::error::{Error, Result};
use crate::transport::{ClientTransport, WorkerTransport};

/// Build a connected client/worker transport pair.
///
/// The worker half is cloneable so several worker tasks can drain the same
/// request queue; the receiver sits behind a mutex, which serializes pulls
/// but keeps FIFO hand-off across workers.
pub fn channel<I, O>() -> (ChannelClientTransport<I, O>, ChannelWorkerTransport<I, O>) {
    let (request_tx, request_rx) = unbounded_channel();
    let (response_tx, response_rx) = unbounded_channel();
    (
        ChannelClientTransport {
            request_tx,
            response_rx: Mutex::new(response_rx),
        },
        ChannelWorkerTransport {
            request_rx: Arc::new(Mutex::new(request_rx)),
            response_tx,
        },
    )
}

pub struct ChannelClientTransport<I, O> {
    request_tx: UnboundedSender<WorkItem<I>>,
    response_rx: Mutex<UnboundedReceiver<ResultItem<O>>>,
}

pub struct ChannelWorkerTransport<I, O> {
    request_rx: Arc<Mutex<UnboundedReceiver<WorkItem<I>>>>,
    response_tx: UnboundedSender<ResultItem<O>>,
}

impl<I, O> Clone for ChannelWorkerTransport<I, O> {
    fn clone(&self) -> Self {
        Self {
            request_rx: self.request_rx.clone(),
            response_tx: self.response_tx.clone(),
        }
    }
}

#[async_trait]
impl<I, O> ClientTransport<I, O> for ChannelClientTransport<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn send_request(&self, item: WorkItem<I>) -> Result<()> {
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

#[async_trait]
impl<I, O> WorkerTransport<I, O> for ChannelWorkerTransport<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn recv_request(&self, timeout: Duration) -> Result<Option<WorkItem<I>>> {
        let mut receiver = self.request_rx.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(Error::ChannelClosed),
            Ok(Some(item)) => Ok(Some(item)),
        }
    }

    async fn send_response(&self, _client_id: Uuid, item: ResultItem<O>) -> Result<()> {
        // Single client per transport pair; the id is only meaningful on
        // broker-backed transports.
        self.response_tx.send(item).map_err(|_| Error::ChannelClosed)
    }
}
