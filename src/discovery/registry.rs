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

use crate::discovery::{
    ContainerDetails, DiscoveryError, DiscoveryEvent, DiscoveryFilter, DiscoverySource, EventAction,
    Instance,
};
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(#[source] DiscoveryError),
    #[error("cannot resolve instance {id}: {reason}")]
    Resolution { id: String, reason: String },
}

/// How a discovered container is turned into an [`Instance`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub filter: DiscoveryFilter,
    /// Port the storage service listens on inside the container.
    pub container_port: u16,
    /// Environment variables carrying the backend's credentials.
    pub user_env: String,
    pub password_env: String,
}

impl ResolveOptions {
    pub fn new(filter: DiscoveryFilter) -> Self {
        Self {
            filter,
            container_port: 9000,
            user_env: "MINIO_ROOT_USER".to_string(),
            password_env: "MINIO_ROOT_PASSWORD".to_string(),
        }
    }
}

/// Live set of storage backends, keyed by container id.
///
/// Reads share a single `RwLock`; writes take it exclusively. Discovery I/O in
/// [`poll_network`](Self::poll_network) and [`handle_event`](Self::handle_event)
/// runs without holding the lock, so a slow orchestrator never stalls readers.
pub struct ServiceRegistry {
    source: Arc<dyn DiscoverySource>,
    options: ResolveOptions,
    instances: RwLock<HashMap<String, Instance>>,
}

impl ServiceRegistry {
    pub fn new(source: Arc<dyn DiscoverySource>, options: ResolveOptions) -> Self {
        Self {
            source,
            options,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn DiscoverySource> {
        &self.source
    }

    pub fn filter(&self) -> &DiscoveryFilter {
        &self.options.filter
    }

    /// Insert or replace the instance registered under `id`.
    pub async fn add_instance(&self, id: impl Into<String>, instance: Instance) {
        let mut instances = self.instances.write().await;
        instances.insert(id.into(), instance);
        metrics::set_registry_instances(instances.len());
    }

    /// Remove `id`; unknown ids are ignored.
    pub async fn remove_instance(&self, id: &str) {
        let mut instances = self.instances.write().await;
        if instances.remove(id).is_some() {
            metrics::set_registry_instances(instances.len());
        }
    }

    /// Copy of the current instances, in no particular order.
    pub async fn get_instances(&self) -> Vec<Instance> {
        let instances = self.instances.read().await;
        instances.values().cloned().collect()
    }

    pub async fn get_instance(&self, id: &str) -> Result<Instance, RegistryError> {
        let instances = self.instances.read().await;
        instances
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    async fn is_registered(&self, id: &str) -> bool {
        self.instances.read().await.contains_key(id)
    }

    /// One discovery sweep.
    ///
    /// Lists running backends and registers every one not already known.
    /// Known instances are not re-inspected, so an address change under an
    /// unchanged id goes unnoticed. A container that cannot be resolved is
    /// logged and skipped. Returns the number of newly registered instances.
    pub async fn poll_network(&self) -> Result<usize, RegistryError> {
        tracing::debug!(network = %self.options.filter.network, "Polling network for storage instances");
        let start = std::time::Instant::now();

        let containers = match self.source.list_running(&self.options.filter).await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list containers");
                metrics::increment_discovery_error("unavailable");
                return Err(RegistryError::DiscoveryUnavailable(e));
            }
        };
        tracing::debug!(count = containers.len(), "Found containers");

        let mut added = 0;
        for container in containers {
            if self.is_registered(&container.id).await {
                continue;
            }

            let instance = match self.resolve(&container.id).await {
                Ok(instance) => instance,
                Err(e) => {
                    tracing::warn!(container_id = %container.id, error = %e, "Skipping storage instance");
                    metrics::increment_discovery_error("resolution");
                    continue;
                }
            };

            tracing::info!(instance = ?instance, "Found storage instance");
            self.add_instance(container.id, instance).await;
            added += 1;
        }

        metrics::record_discovery_sweep(start.elapsed().as_secs_f64());
        Ok(added)
    }

    /// Apply one lifecycle event from a push-based source.
    pub async fn handle_event(&self, event: &DiscoveryEvent) -> Result<(), RegistryError> {
        let kind = event.kind();
        metrics::increment_discovery_event(kind.class());

        if kind.brings_up() {
            let details = self.inspect(&event.actor_id).await?;
            if !details.matches(&self.options.filter) {
                tracing::debug!(container_id = %event.actor_id, "Ignoring container outside the discovery filter");
                return Ok(());
            }
            let instance = resolve_instance(&details, &self.options)?;
            tracing::info!(action = %event.action, instance = ?instance, "Registering storage instance");
            self.add_instance(event.actor_id.clone(), instance).await;
        } else if kind.takes_down() {
            tracing::info!(action = %event.action, container_id = %event.actor_id, "Removing storage instance");
            self.remove_instance(&event.actor_id).await;
        } else if let EventAction::Other(action) = kind {
            tracing::debug!(action = %action, container_id = %event.actor_id, "Ignoring container event");
        }

        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, RegistryError> {
        self.source.inspect(id).await.map_err(|e| match e {
            DiscoveryError::Unavailable(_) => RegistryError::DiscoveryUnavailable(e),
            other => RegistryError::Resolution {
                id: id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    async fn resolve(&self, id: &str) -> Result<Instance, RegistryError> {
        let details = self.inspect(id).await?;
        resolve_instance(&details, &self.options)
    }
}

/// Connection details for a container, or why it cannot be used.
pub fn resolve_instance(
    details: &ContainerDetails,
    options: &ResolveOptions,
) -> Result<Instance, RegistryError> {
    let fail = |reason: String| RegistryError::Resolution {
        id: details.id.clone(),
        reason,
    };

    let host_port = details
        .ports
        .get(&options.container_port)
        .or_else(|| details.ports.values().next())
        .copied()
        .ok_or_else(|| fail("no published ports".to_string()))?;

    let name = details.name.trim_start_matches('/');
    if name.is_empty() {
        return Err(fail("container has no name".to_string()));
    }

    let network = &options.filter.network;
    let address = if network.is_empty() {
        details.networks.values().next()
    } else {
        details.networks.get(network)
    };
    let ip = address
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| fail(format!("no address on network {:?}", network)))?;

    Ok(Instance {
        id: details.id.clone(),
        name: name.to_string(),
        ip: ip.clone(),
        container_port: options.container_port,
        host_port,
        user: details.env_value(&options.user_env).unwrap_or_default().to_string(),
        password: details
            .env_value(&options.password_env)
            .unwrap_or_default()
            .to_string(),
    })
}
