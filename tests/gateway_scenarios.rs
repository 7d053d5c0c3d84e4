mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{container, instance, registry_with, FakeSource};
use dynamolike::discovery::{DiscoveryEvent, Instance};
use dynamolike::gateway::{Gateway, GatewayBuilder, GatewayError};
use dynamolike::storage::in_memory::{InMemoryConnector, InMemoryNode};
use dynamolike::storage::{
    NodeClient, NodeConnector, ObjectStream, RequestContext, StorageError, UploadReceipt,
};
use std::sync::Arc;

fn ctx() -> RequestContext {
    RequestContext::new("test-request")
}

async fn read(gateway: &Gateway, key: &str) -> Bytes {
    let body = gateway.get(&ctx(), key).await.unwrap();
    body.into_bytes().await.unwrap()
}

#[tokio::test]
async fn test_scenario_no_instances() {
    let registry = registry_with(Arc::new(FakeSource::default()));
    registry.poll_network().await.unwrap();

    let result = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .build(&registry)
        .await;
    assert!(matches!(result, Err(GatewayError::NoInstances)));
}

#[tokio::test]
async fn test_scenario_two_instances_put_get() {
    let source = Arc::new(FakeSource::new(vec![
        container("a", "172.18.0.2"),
        container("b", "172.18.0.3"),
    ]));
    let registry = registry_with(source);
    registry.poll_network().await.unwrap();

    let connector = Arc::new(InMemoryConnector::new());
    let gateway = GatewayBuilder::new(connector.clone())
        .partitions(2)
        .build(&registry)
        .await
        .unwrap();
    assert_eq!(gateway.len(), 2);
    assert_eq!(gateway.node_count(), 2);

    let receipt = gateway
        .put(&ctx(), "object-1", Bytes::from_static(b"payload"))
        .await
        .unwrap();
    assert_eq!(receipt.key, "object-1");
    assert_eq!(receipt.bucket, "bucket-name");
    assert_eq!(receipt.size, 7);

    assert_eq!(read(&gateway, "object-1").await, Bytes::from_static(b"payload"));

    // Stored on exactly the node the partitioner picked
    let index = gateway.node_for("object-1");
    let owner = gateway.node(index).unwrap().instance.id.clone();
    for id in ["a", "b"] {
        let node = connector.node(id).unwrap();
        assert_eq!(node.contains("bucket-name", "object-1").await, id == owner);
        assert!(node.has_bucket("bucket-name").await);
    }
}

#[tokio::test]
async fn test_scenario_stale_table_after_removal() {
    let source = Arc::new(FakeSource::new(vec![
        container("a", "172.18.0.2"),
        container("b", "172.18.0.3"),
    ]));
    let registry = registry_with(source.clone());
    registry.poll_network().await.unwrap();

    let gateway = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .build(&registry)
        .await
        .unwrap();

    // Both containers die; the registry drops them through the event path
    for id in ["a", "b"] {
        source.remove(id).await;
        registry
            .handle_event(&DiscoveryEvent::new("die", id))
            .await
            .unwrap();
    }
    assert!(registry.is_empty().await);

    for i in 0..20 {
        let key = format!("object-{}", i);
        gateway
            .put(&ctx(), &key, Bytes::from(key.clone()))
            .await
            .unwrap();
        assert_eq!(read(&gateway, &key).await, Bytes::from(key));
    }
    assert_eq!(gateway.len(), 2);
}

#[tokio::test]
async fn test_keys_are_not_paths() {
    let registry = registry_with(Arc::new(FakeSource::default()));
    registry.add_instance("a", instance("a")).await;
    registry.add_instance("b", instance("b")).await;
    let gateway = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .build(&registry)
        .await
        .unwrap();

    for key in ["release..notes", "..", "a..b..c"] {
        gateway.put(&ctx(), key, Bytes::from(key)).await.unwrap();
        assert_eq!(read(&gateway, key).await, Bytes::from(key));
    }
}

#[tokio::test]
async fn test_missing_partition_is_node_not_found() {
    let registry = registry_with(Arc::new(FakeSource::default()));
    registry.add_instance("a", instance("a")).await;
    registry.add_instance("b", instance("b")).await;

    let gateway = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .partitions(3)
        .build(&registry)
        .await
        .unwrap();
    assert_eq!(gateway.len(), 2);

    // Find a key that hashes to the unfilled slot
    let key = (0..10_000)
        .map(|i| format!("key-{}", i))
        .find(|k| gateway.node_for(k) == 2)
        .unwrap();

    match gateway.get(&ctx(), &key).await {
        Err(GatewayError::NodeNotFound { index, key: k }) => {
            assert_eq!(index, 2);
            assert_eq!(k, key);
        }
        other => panic!("expected NodeNotFound, got {:?}", other),
    }
    assert!(matches!(
        gateway.put(&ctx(), &key, Bytes::new()).await,
        Err(GatewayError::NodeNotFound { index: 2, .. })
    ));
}

#[tokio::test]
async fn test_routing_is_deterministic_across_builds() {
    let mut ids: Vec<String> = (0..5).map(|i| format!("node-{}", i)).collect();
    let snapshot: Vec<Instance> = ids.iter().map(|id| instance(id)).collect();
    let first = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .build_from_snapshot(snapshot)
        .await
        .unwrap();

    // Same member set in another order
    ids.reverse();
    let snapshot: Vec<Instance> = ids.iter().map(|id| instance(id)).collect();
    let second = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .build_from_snapshot(snapshot)
        .await
        .unwrap();

    for i in 0..1000 {
        let key = format!("object-{}", i);
        let a = first.node_for(&key);
        let b = second.node_for(&key);
        assert_eq!(a, b);
        assert_eq!(
            first.node(a).unwrap().instance.id,
            second.node(b).unwrap().instance.id
        );
    }
}

#[tokio::test]
async fn test_backend_missing_object_propagates() {
    let gateway = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
        .build_from_snapshot(vec![instance("a")])
        .await
        .unwrap();

    assert!(matches!(
        gateway.get(&ctx(), "never-written").await,
        Err(GatewayError::Backend(StorageError::ObjectNotFound { .. }))
    ));
}

/// Node whose bucket provisioning always fails
struct BrokenNode(InMemoryNode);

#[async_trait]
impl NodeClient for BrokenNode {
    fn node_id(&self) -> &str {
        self.0.node_id()
    }

    async fn ensure_bucket(
        &self,
        _ctx: &RequestContext,
        _bucket: &str,
    ) -> Result<bool, StorageError> {
        Err(StorageError::Unreachable("connection refused".to_string()))
    }

    async fn get(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectStream, StorageError> {
        self.0.get(ctx, bucket, key).await
    }

    async fn put(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<UploadReceipt, StorageError> {
        self.0.put(ctx, bucket, key, body).await
    }
}

/// Hands out a broken client for one id, in-memory nodes for the rest
struct PartlyBrokenConnector {
    broken: String,
}

impl NodeConnector for PartlyBrokenConnector {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn NodeClient>, StorageError> {
        let node = InMemoryNode::new(instance.id.clone());
        if instance.id == self.broken {
            Ok(Arc::new(BrokenNode(node)))
        } else {
            Ok(Arc::new(node))
        }
    }
}

#[tokio::test]
async fn test_provisioning_failure_aborts_build() {
    let result = GatewayBuilder::new(Arc::new(PartlyBrokenConnector {
        broken: "b".to_string(),
    }))
    .build_from_snapshot(vec![instance("a"), instance("b")])
    .await;

    match result {
        Err(GatewayError::InitializationFailed { node, source }) => {
            assert_eq!(node, "b");
            assert!(matches!(source, StorageError::Unreachable(_)));
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("build should fail"),
    }

    // Skipping provisioning lets the same set come up
    let gateway = GatewayBuilder::new(Arc::new(PartlyBrokenConnector {
        broken: "b".to_string(),
    }))
    .provision_buckets(false)
    .build_from_snapshot(vec![instance("a"), instance("b")])
    .await
    .unwrap();
    assert_eq!(gateway.len(), 2);
}
