// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Key-routed front door over the discovered storage nodes.

use crate::discovery::{Instance, ServiceRegistry};
use crate::observability::metrics;
use crate::partition::{PartitionError, Partitioner};
use crate::storage::{
    NodeClient, NodeConnector, ObjectStream, RequestContext, StorageError, UploadReceipt,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_BUCKET: &str = "bucket-name";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no storage instances registered")]
    NoInstances,
    #[error("invalid partition count: {0}")]
    InvalidPartitions(#[from] PartitionError),
    #[error("no storage node could be connected")]
    NoReachableNodes,
    #[error("failed to initialize node {node}: {source}")]
    InitializationFailed {
        node: String,
        #[source]
        source: StorageError,
    },
    #[error("node {index} not found for object {key}")]
    NodeNotFound { index: usize, key: String },
    #[error(transparent)]
    Backend(#[from] StorageError),
}

impl GatewayError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoInstances => "no_instances",
            GatewayError::InvalidPartitions(_) => "invalid_partitions",
            GatewayError::NoReachableNodes => "no_reachable_nodes",
            GatewayError::InitializationFailed { .. } => "initialization_failed",
            GatewayError::NodeNotFound { .. } => "node_not_found",
            GatewayError::Backend(_) => "backend",
        }
    }
}

/// One slot of the node table.
#[derive(Clone)]
pub struct NodeEntry {
    pub instance: Instance,
    pub client: Arc<dyn NodeClient>,
}

/// Collects the settings a [`Gateway`] is built from.
///
/// Building takes a registry snapshot, connects one client per partition and
/// provisions each node's bucket. The result is immutable: later registry
/// changes are not reflected until a new gateway is built.
pub struct GatewayBuilder {
    connector: Arc<dyn NodeConnector>,
    partitions: Option<usize>,
    bucket: String,
    provision_buckets: bool,
}

impl GatewayBuilder {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            connector,
            partitions: None,
            bucket: DEFAULT_BUCKET.to_string(),
            provision_buckets: true,
        }
    }

    /// Fixed node count for the partitioner. Defaults to the snapshot size.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn provision_buckets(mut self, provision: bool) -> Self {
        self.provision_buckets = provision;
        self
    }

    pub async fn build(self, registry: &ServiceRegistry) -> Result<Gateway, GatewayError> {
        let snapshot = registry.get_instances().await;
        self.build_from_snapshot(snapshot).await
    }

    pub async fn build_from_snapshot(
        self,
        mut instances: Vec<Instance>,
    ) -> Result<Gateway, GatewayError> {
        if instances.is_empty() {
            tracing::error!("No instances found");
            return Err(GatewayError::NoInstances);
        }

        // Registry order is arbitrary; sort so a given member set always yields the same table.
        instances.sort_by(|a, b| a.id.cmp(&b.id));

        let partitioner = Partitioner::new(self.partitions.unwrap_or(instances.len()))?;
        let node_count = partitioner.node_count();
        if instances.len() > node_count {
            tracing::warn!(
                instances = instances.len(),
                partitions = node_count,
                "More instances than partitions; surplus instances receive no traffic"
            );
        }

        let attempts: Vec<(usize, Instance, Result<Arc<dyn NodeClient>, StorageError>)> = instances
            .into_iter()
            .take(node_count)
            .enumerate()
            .map(|(index, instance)| {
                let client = self.connector.connect(&instance);
                (index, instance, client)
            })
            .collect();

        let mut nodes = HashMap::with_capacity(attempts.len());
        for (index, instance, client) in attempts {
            match client {
                Ok(client) => {
                    nodes.insert(index, NodeEntry { instance, client });
                }
                Err(e) => {
                    tracing::error!(index, node_id = %instance.id, error = %e, "Failed to create node");
                }
            }
        }

        if nodes.is_empty() {
            return Err(GatewayError::NoReachableNodes);
        }

        if self.provision_buckets {
            let ctx = RequestContext::new("provision");
            let mut indices: Vec<usize> = nodes.keys().copied().collect();
            indices.sort_unstable();
            for index in indices {
                let entry = &nodes[&index];
                entry
                    .client
                    .ensure_bucket(&ctx, &self.bucket)
                    .await
                    .map_err(|source| {
                        tracing::error!(
                            bucket = %self.bucket,
                            node_id = %entry.instance.id,
                            error = %source,
                            "Failed to create bucket"
                        );
                        GatewayError::InitializationFailed {
                            node: entry.instance.id.clone(),
                            source,
                        }
                    })?;
            }
        }

        tracing::info!(
            partitions = node_count,
            nodes = nodes.len(),
            bucket = %self.bucket,
            "Gateway ready"
        );

        Ok(Gateway {
            partitioner,
            bucket: self.bucket,
            nodes,
        })
    }
}

/// Routes each key to exactly one node. No replication, no fallback.
pub struct Gateway {
    partitioner: Partitioner,
    bucket: String,
    nodes: HashMap<usize, NodeEntry>,
}

impl Gateway {
    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    pub fn node_count(&self) -> usize {
        self.partitioner.node_count()
    }

    /// Number of partitions that have a client.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn node(&self, index: usize) -> Option<&NodeEntry> {
        self.nodes.get(&index)
    }

    /// Node table entries ordered by partition index.
    pub fn nodes(&self) -> Vec<(usize, &Instance)> {
        let mut out: Vec<(usize, &Instance)> = self
            .nodes
            .iter()
            .map(|(index, entry)| (*index, &entry.instance))
            .collect();
        out.sort_by_key(|(index, _)| *index);
        out
    }

    pub fn node_for(&self, key: &str) -> usize {
        self.partitioner.hash(key)
    }

    fn route(&self, operation: &str, key: &str) -> Result<&NodeEntry, GatewayError> {
        let index = self.partitioner.hash(key);
        match self.nodes.get(&index) {
            Some(entry) => {
                metrics::increment_gateway_route(operation, index);
                Ok(entry)
            }
            None => {
                tracing::error!(index, key, nodes = self.nodes.len(), "node not found");
                metrics::increment_gateway_error(operation, "node_not_found");
                Err(GatewayError::NodeNotFound {
                    index,
                    key: key.to_string(),
                })
            }
        }
    }

    /// Open the object's body on its owning node. Chunks arrive as the node sends them.
    pub async fn get(&self, ctx: &RequestContext, key: &str) -> Result<ObjectStream, GatewayError> {
        let entry = self.route("get", key)?;
        entry
            .client
            .get(ctx, &self.bucket, key)
            .await
            .map_err(|e| {
                metrics::increment_gateway_error("get", "backend");
                GatewayError::Backend(e)
            })
    }

    pub async fn put(
        &self,
        ctx: &RequestContext,
        key: &str,
        body: Bytes,
    ) -> Result<UploadReceipt, GatewayError> {
        let entry = self.route("put", key)?;
        entry
            .client
            .put(ctx, &self.bucket, key, body)
            .await
            .map_err(|e| {
                metrics::increment_gateway_error("put", "backend");
                GatewayError::Backend(e)
            })
    }
}
