use crate::discovery::Instance;
use crate::storage::common::{compute_etag, validate_bucket, validate_key};
use crate::storage::{
    NodeClient, NodeConnector, ObjectStream, RequestContext, StorageError, UploadReceipt,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
}

/// In-memory storage node.
///
/// Data structures:
/// - `buckets`: a set of bucket names
/// - `objects`: a BTreeMap keyed by (bucket, key) => StoredObject
#[derive(Debug)]
pub struct InMemoryNode {
    id: String,
    buckets: RwLock<BTreeSet<String>>,
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl InMemoryNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            buckets: RwLock::new(BTreeSet::new()),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains(bucket)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub async fn etag(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.etag.clone())
    }
}

#[async_trait]
impl NodeClient for InMemoryNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn ensure_bucket(
        &self,
        _ctx: &RequestContext,
        bucket: &str,
    ) -> Result<bool, StorageError> {
        validate_bucket(bucket)?;
        let mut b = self.buckets.write().await;
        Ok(b.insert(bucket.to_string()))
    }

    async fn get(
        &self,
        _ctx: &RequestContext,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectStream, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let objs = self.objects.read().await;
        let obj = objs
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(ObjectStream::from_bytes(obj.data.clone()))
    }

    async fn put(
        &self,
        _ctx: &RequestContext,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<UploadReceipt, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        // bucket must exist
        {
            let b = self.buckets.read().await;
            if !b.contains(bucket) {
                return Err(StorageError::BucketNotFound(bucket.to_string()));
            }
        }

        let etag = compute_etag(&body);
        let receipt = UploadReceipt {
            key: key.to_string(),
            bucket: bucket.to_string(),
            location: format!("memory://{}/{}/{}", self.id, bucket, key),
            etag: etag.clone(),
            size: body.len() as u64,
        };

        let mut objs = self.objects.write().await;
        objs.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: body,
                etag,
            },
        );
        Ok(receipt)
    }
}

/// Hands out one [`InMemoryNode`] per instance id, reusing it across
/// connections so a rebuilt gateway sees earlier writes.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    nodes: Mutex<HashMap<String, Arc<InMemoryNode>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<Arc<InMemoryNode>> {
        self.nodes
            .lock()
            .ok()
            .and_then(|nodes| nodes.get(id).cloned())
    }
}

impl NodeConnector for InMemoryConnector {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn NodeClient>, StorageError> {
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| StorageError::Internal("in-memory connector lock poisoned".into()))?;
        let node: Arc<dyn NodeClient> = nodes
            .entry(instance.id.clone())
            .or_insert_with(|| Arc::new(InMemoryNode::new(instance.id.clone())))
            .clone();
        Ok(node)
    }
}
