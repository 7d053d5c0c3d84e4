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

use crate::discovery::{ContainerDetails, DiscoveryFilter, ResolveOptions};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP listen address, e.g. "0.0.0.0:3000"
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Number of partitions the gateway hashes keys over, fixed at startup.
    /// Instances beyond this count receive no traffic; partitions without an
    /// instance fail their requests.
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Largest PUT body accepted; bigger uploads are answered with 413
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: usize,

    /// Prefix for X-Request-ID values (helpful for log correlation)
    #[serde(default = "default_request_id_prefix")]
    pub request_id_prefix: String,

    /// Per-request deadline handed to the storage client (0 = none)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on draining in-flight requests at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Sweep the Docker engine on a fixed interval
    Poll,
    /// Follow the Docker engine's event stream
    Events,
    /// Fixed instance list from this file
    Static,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_mode")]
    pub mode: DiscoveryMode,
    /// Docker engine endpoint; falls back to DOCKER_HOST
    #[serde(default)]
    pub docker_host: Option<String>,
    /// Docker network the storage containers are attached to
    #[serde(default)]
    pub network: String,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Port the storage service listens on inside its container
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Delay before resubscribing to a dropped event stream
    #[serde(default = "default_event_retry_secs")]
    pub event_retry_secs: u64,
    /// Wait before the first sweep so backends have time to come up
    #[serde(default)]
    pub startup_delay_secs: u64,
    #[serde(default = "default_user_env")]
    pub user_env: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Backends for `mode = "static"`
    #[serde(default)]
    pub instances: Vec<StaticInstanceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticInstanceConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub ip: String,
    #[serde(default = "default_container_port")]
    pub port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Talk to each node over HTTP
    Http,
    /// Keep every node's objects in process memory
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Bucket every node stores objects in
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub use_ssl: bool,
    /// Create the bucket on every node before serving
    #[serde(default = "default_provision_buckets")]
    pub provision_buckets: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            partitions: default_partitions(),
            max_object_bytes: default_max_object_bytes(),
            request_id_prefix: default_request_id_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            discovery: DiscoveryConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            docker_host: None,
            network: String::new(),
            name_prefix: default_name_prefix(),
            image: default_image(),
            container_port: default_container_port(),
            poll_interval_secs: default_poll_interval_secs(),
            event_retry_secs: default_event_retry_secs(),
            startup_delay_secs: 0,
            user_env: default_user_env(),
            password_env: default_password_env(),
            instances: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: default_bucket(),
            region: default_region(),
            use_ssl: false,
            provision_buckets: default_provision_buckets(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }
}

impl DiscoveryConfig {
    pub fn filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            name_prefix: self.name_prefix.clone(),
            image: self.image.clone(),
            network: self.network.clone(),
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            filter: self.filter(),
            container_port: self.container_port,
            user_env: self.user_env.clone(),
            password_env: self.password_env.clone(),
        }
    }

    /// Static instances rendered as the containers a live source would report,
    /// so they go through the same filter and resolution path.
    pub fn static_containers(&self) -> Vec<ContainerDetails> {
        self.instances
            .iter()
            .map(|i| ContainerDetails {
                id: i.id.clone(),
                name: i
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}-{}", self.name_prefix, i.id)),
                image: self.image.clone(),
                running: true,
                networks: BTreeMap::from([(self.network.clone(), i.ip.clone())]),
                ports: BTreeMap::from([(i.port, i.host_port.unwrap_or(i.port))]),
                env: vec![
                    format!("{}={}", self.user_env, i.user),
                    format!("{}={}", self.password_env, i.password),
                ],
            })
            .collect()
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_partitions() -> usize {
    2
}

fn default_max_object_bytes() -> usize {
    crate::object_http::DEFAULT_MAX_BODY_BYTES
}

fn default_request_id_prefix() -> String {
    String::new()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_mode() -> DiscoveryMode {
    DiscoveryMode::Poll
}

fn default_name_prefix() -> String {
    "minio".to_string()
}

fn default_image() -> String {
    "minio/minio".to_string()
}

fn default_container_port() -> u16 {
    9000
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_event_retry_secs() -> u64 {
    5
}

fn default_user_env() -> String {
    "MINIO_ROOT_USER".to_string()
}

fn default_password_env() -> String {
    "MINIO_ROOT_PASSWORD".to_string()
}

fn default_backend() -> BackendKind {
    BackendKind::Http
}

fn default_bucket() -> String {
    crate::gateway::DEFAULT_BUCKET.to_string()
}

fn default_region() -> String {
    crate::storage::http_node::DEFAULT_REGION.to_string()
}

fn default_provision_buckets() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    5
}
