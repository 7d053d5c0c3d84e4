#![allow(dead_code)]

use async_trait::async_trait;
use dynamolike::discovery::{
    ContainerDetails, ContainerSummary, DiscoveryError, DiscoveryEvent, DiscoveryFilter,
    DiscoverySource, Instance, ResolveOptions, ServiceRegistry,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

pub const NETWORK: &str = "test-net";

pub fn filter() -> DiscoveryFilter {
    DiscoveryFilter {
        name_prefix: "minio".to_string(),
        image: "minio/minio".to_string(),
        network: NETWORK.to_string(),
    }
}

pub fn container(id: &str, ip: &str) -> ContainerDetails {
    ContainerDetails {
        id: id.to_string(),
        name: format!("/minio-{}", id),
        image: "minio/minio".to_string(),
        running: true,
        networks: BTreeMap::from([(NETWORK.to_string(), ip.to_string())]),
        ports: BTreeMap::from([(9000, 32768)]),
        env: vec![
            "MINIO_ROOT_USER=minio".to_string(),
            "MINIO_ROOT_PASSWORD=minio123".to_string(),
        ],
    }
}

pub fn instance(id: &str) -> Instance {
    Instance {
        id: id.to_string(),
        name: format!("minio-{}", id),
        ip: "127.0.0.1".to_string(),
        container_port: 9000,
        host_port: 9000,
        user: "minio".to_string(),
        password: "minio123".to_string(),
    }
}

/// Mutable in-process discovery source
#[derive(Default)]
pub struct FakeSource {
    containers: RwLock<Vec<ContainerDetails>>,
    unavailable: AtomicBool,
    events: Mutex<Option<mpsc::Sender<DiscoveryEvent>>>,
}

impl FakeSource {
    pub fn new(containers: Vec<ContainerDetails>) -> Self {
        Self {
            containers: RwLock::new(containers),
            ..Default::default()
        }
    }

    pub async fn add(&self, container: ContainerDetails) {
        self.containers.write().await.push(container);
    }

    pub async fn remove(&self, id: &str) {
        self.containers.write().await.retain(|c| c.id != id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn is_subscribed(&self) -> bool {
        self.events.lock().await.is_some()
    }

    /// Push an event to the current subscriber; false when nobody listens.
    pub async fn emit(&self, event: DiscoveryEvent) -> bool {
        match self.events.lock().await.as_ref() {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Drop the sender so the subscriber sees the stream end.
    pub async fn close_stream(&self) {
        self.events.lock().await.take();
    }

    fn check_available(&self) -> Result<(), DiscoveryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unavailable("docker daemon down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DiscoverySource for FakeSource {
    async fn list_running(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<ContainerSummary>, DiscoveryError> {
        self.check_available()?;
        Ok(self
            .containers
            .read()
            .await
            .iter()
            .filter(|c| c.matches(filter))
            .map(|c| c.summary())
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, DiscoveryError> {
        self.check_available()?;
        self.containers
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
    }

    async fn subscribe(
        &self,
        _filter: &DiscoveryFilter,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        self.check_available()?;
        let (tx, rx) = mpsc::channel(16);
        *self.events.lock().await = Some(tx);
        Ok(rx)
    }
}

pub fn registry_with(source: Arc<FakeSource>) -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new(source, ResolveOptions::new(filter())))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
