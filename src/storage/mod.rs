//! Per-node storage clients.
//!
//! The gateway never talks to a backend directly: it holds one
//! [`NodeClient`] per partition, created by a [`NodeConnector`] from the
//! registry's [`Instance`](crate::discovery::Instance) data.

use crate::discovery::Instance;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;

pub mod common;
pub mod http_node;
pub mod in_memory;
pub mod sigv4;

/// What a backend reports after storing an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub bucket: String,
    pub location: String,
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("request deadline exceeded")]
    Timeout,
    #[error("storage node unreachable: {0}")]
    Unreachable(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Object body handed back by [`NodeClient::get`], chunk by chunk.
pub struct ObjectStream {
    inner: BoxStream<'static, Result<Bytes, StorageError>>,
}

impl ObjectStream {
    pub fn new(stream: impl Stream<Item = Result<Bytes, StorageError>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        Self::new(stream::once(async move { Ok(data) }))
    }

    /// Buffer the remaining chunks into one.
    pub async fn into_bytes(mut self) -> Result<Bytes, StorageError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ObjectStream {
    type Item = Result<Bytes, StorageError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream").finish_non_exhaustive()
    }
}

/// Per-request data threaded down to the storage client.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// Registry id of the instance this client talks to.
    fn node_id(&self) -> &str;

    /// Create `bucket` unless it already exists. Returns `true` if it was created.
    async fn ensure_bucket(&self, ctx: &RequestContext, bucket: &str)
        -> Result<bool, StorageError>;

    async fn get(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectStream, StorageError>;

    async fn put(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<UploadReceipt, StorageError>;
}

/// Builds a client for a discovered instance.
pub trait NodeConnector: Send + Sync + 'static {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn NodeClient>, StorageError>;
}
