use dynamolike::config::{Config, DiscoveryMode};
use dynamolike::discovery::static_source::StaticSource;
use dynamolike::discovery::ServiceRegistry;
use dynamolike::storage::in_memory::InMemoryNode;
use dynamolike::storage::{NodeClient, RequestContext};
use std::sync::Arc;

#[tokio::test]
async fn in_memory_put_get_roundtrip() {
    let node = InMemoryNode::new("n1");
    let ctx = RequestContext::new("basic");
    assert!(node.ensure_bucket(&ctx, "b1").await.unwrap());
    // Second call reports the bucket already exists
    assert!(!node.ensure_bucket(&ctx, "b1").await.unwrap());

    let receipt = node
        .put(&ctx, "b1", "k1", bytes::Bytes::from_static(b"hello"))
        .await
        .unwrap();
    assert_eq!(receipt.size, 5);
    assert_eq!(receipt.location, "memory://n1/b1/k1");

    let body = node.get(&ctx, "b1", "k1").await.unwrap();
    let data = body.into_bytes().await.unwrap();
    assert_eq!(&data[..], b"hello");
    assert_eq!(node.etag("b1", "k1").await.unwrap(), receipt.etag);
}

#[tokio::test]
async fn static_config_populates_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[discovery]
mode = "static"
network = "local"

[[discovery.instances]]
id = "n1"
ip = "10.0.0.1"

[[discovery.instances]]
id = "n2"
ip = "10.0.0.2"
host_port = 19000
"#,
    )
    .unwrap();

    let cfg = Config::from_path(&path).unwrap();
    assert_eq!(cfg.discovery.mode, DiscoveryMode::Static);

    let registry = ServiceRegistry::new(
        Arc::new(StaticSource::new(cfg.discovery.static_containers())),
        cfg.discovery.resolve_options(),
    );
    assert_eq!(registry.poll_network().await.unwrap(), 2);

    let n2 = registry.get_instance("n2").await.unwrap();
    assert_eq!(n2.ip, "10.0.0.2");
    assert_eq!(n2.container_port, 9000);
    assert_eq!(n2.host_port, 19000);
    assert_eq!(n2.name, "minio-n2");
}
