//! Broker-backed transport.
//!
//! All clients and workers share one request list; each client subscribes
//! to its own response channel, and workers publish each result to the
//! channel of the client that originated the item. The broker is treated
//! as an opaque collaborator: reconnection beyond what the connection
//! manager provides is the host application's concern.
//!
//! Key layout, shared by clients and workers through `prefix`:
//!
//! * request list:      `request_queue{prefix}`
//! * response channels: `response_pb_{prefix}{client_id}`

use std::marker::PhantomData;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Msg};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::communication::{ResultItem, WorkItem};
use crate::error::{Error, Result};
use crate::transport::{ClientTransport, WorkerTransport};

fn request_queue_key(prefix: &str) -> String {
    format!("request_queue{prefix}")
}

fn response_channel(prefix: &str, client_id: Uuid) -> String {
    format!("response_pb_{prefix}{client_id}")
}

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Streamer-side broker endpoint: pushes requests to the shared list and
/// subscribes to this client's response channel.
pub struct RedisClientTransport<I, O> {
    connection: ConnectionManager,
    messages: Mutex<MessageStream>,
    request_key: String,
    _marker: PhantomData<fn() -> (I, O)>,
}

impl<I, O> RedisClientTransport<I, O> {
    /// Connect to the broker at `url` (e.g. `redis://localhost:6379`) and
    /// subscribe to the response channel for `client_id`.
    pub async fn connect(url: &str, prefix: &str, client_id: Uuid) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client.clone()).await?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(response_channel(prefix, client_id)).await?;
        Ok(Self {
            connection,
            messages: Mutex::new(Box::pin(pubsub.into_on_message())),
            request_key: request_queue_key(prefix),
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<I, O> ClientTransport<I, O> for RedisClientTransport<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + Sync + 'static,
{
    async fn send_request(&self, item: WorkItem<I>) -> Result<()> {
        let body = serde_json::to_vec(&item)?;
        let mut connection = self.connection.clone();
        let _: () = connection.lpush(&self.request_key, body).await?;
        Ok(())
    }

    async fn recv_response(&self, timeout: Duration) -> Result<Option<ResultItem<O>>> {
        let mut messages = self.messages.lock().await;
        match tokio::time::timeout(timeout, messages.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(Error::ChannelClosed),
            Ok(Some(message)) => {
                let body: Vec<u8> = message.get_payload()?;
                Ok(Some(serde_json::from_slice(&body)?))
            }
        }
    }
}

/// Worker-side broker endpoint: blocking-pops the shared request list and
/// publishes results to the originating client's channel.
pub struct RedisWorkerTransport<I, O> {
    connection: ConnectionManager,
    request_key: String,
    response_prefix: String,
    _marker: PhantomData<fn() -> (I, O)>,
}

impl<I, O> RedisWorkerTransport<I, O> {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            request_key: request_queue_key(prefix),
            response_prefix: prefix.to_owned(),
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<I, O> WorkerTransport<I, O> for RedisWorkerTransport<I, O>
where
    I: DeserializeOwned + Send + Sync + 'static,
    O: Serialize + Send + Sync + 'static,
{
    async fn recv_request(&self, timeout: Duration) -> Result<Option<WorkItem<I>>> {
        // BRPOP pairs with the client's LPUSH for FIFO draining. Redis
        // accepts fractional timeouts but treats 0 as "block forever", so
        // clamp to a minimum bound.
        let seconds = timeout.as_secs_f64().max(0.001);
        let mut connection = self.connection.clone();
        let reply: Option<(String, Vec<u8>)> =
            connection.brpop(&self.request_key, seconds).await?;
        match reply {
            None => Ok(None),
            Some((_, body)) => Ok(Some(serde_json::from_slice(&body)?)),
        }
    }

    async fn send_response(&self, client_id: Uuid, item: ResultItem<O>) -> Result<()> {
        let body = serde_json::to_vec(&item)?;
        let channel = response_channel(&self.response_prefix, client_id);
        let mut connection = self.connection.clone();
        let _: () = connection.publish(channel, body).await?;
        Ok(())
    }
}
