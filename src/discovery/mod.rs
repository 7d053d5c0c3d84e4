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

//! Backend discovery and the live instance registry.
//!
//! A [`DiscoverySource`] answers "which storage containers are running right
//! now" and, optionally, streams start/stop events. The [`ServiceRegistry`]
//! turns those answers into a thread-safe set of [`Instance`]s, and a
//! [`refresh::RefreshStrategy`] keeps it current in the background.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod docker;
pub mod refresh;
pub mod registry;
pub mod static_source;

pub use registry::{RegistryError, ResolveOptions, ServiceRegistry};

/// One storage backend the gateway can route to.
///
/// Instances are replaced wholesale on update, never edited in place.
#[derive(Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub container_port: u16,
    pub host_port: u16,
    pub user: String,
    pub password: String,
}

impl Instance {
    /// `ip:port` reachable from inside the discovery network.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.container_port)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("container_port", &self.container_port)
            .field("host_port", &self.host_port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Which containers count as storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub name_prefix: String,
    pub image: String,
    pub network: String,
}

/// Row returned by a listing: just enough to decide whether to look closer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
}

/// Full view of one container, as returned by an inspect call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    /// network name -> IP address on that network
    pub networks: BTreeMap<String, String>,
    /// container port -> published host port
    pub ports: BTreeMap<u16, u16>,
    /// `KEY=value` pairs
    pub env: Vec<String>,
}

impl ContainerDetails {
    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    /// Same predicate a filtered listing applies, for containers learned from events.
    pub fn matches(&self, filter: &DiscoveryFilter) -> bool {
        self.running
            && self
                .name
                .trim_start_matches('/')
                .starts_with(filter.name_prefix.as_str())
            && image_matches(&self.image, &filter.image)
            && (filter.network.is_empty() || self.networks.contains_key(&filter.network))
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }
}

fn image_matches(image: &str, wanted: &str) -> bool {
    if wanted.is_empty() || image == wanted {
        return true;
    }
    // "minio/minio:latest" is still an instance of "minio/minio"
    image
        .strip_prefix(wanted)
        .map(|tag| tag.starts_with(':') || tag.starts_with('@'))
        .unwrap_or(false)
}

/// Lifecycle transition reported by a push-based source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub action: String,
    pub actor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Start,
    Unpause,
    Enable,
    Stop,
    Pause,
    Die,
    Disable,
    Other(String),
}

impl EventAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "start" => EventAction::Start,
            "unpause" => EventAction::Unpause,
            "enable" => EventAction::Enable,
            "stop" => EventAction::Stop,
            "pause" => EventAction::Pause,
            "die" => EventAction::Die,
            "disable" => EventAction::Disable,
            other => EventAction::Other(other.to_string()),
        }
    }

    pub fn brings_up(&self) -> bool {
        matches!(
            self,
            EventAction::Start | EventAction::Unpause | EventAction::Enable
        )
    }

    pub fn takes_down(&self) -> bool {
        matches!(
            self,
            EventAction::Stop | EventAction::Pause | EventAction::Die | EventAction::Disable
        )
    }

    /// Bounded label for metrics: `up`, `down` or `other`.
    pub fn class(&self) -> &'static str {
        if self.brings_up() {
            "up"
        } else if self.takes_down() {
            "down"
        } else {
            "other"
        }
    }
}

impl DiscoveryEvent {
    pub fn new(action: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor_id: actor_id.into(),
        }
    }

    pub fn kind(&self) -> EventAction {
        EventAction::parse(&self.action)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery source unavailable: {0}")]
    Unavailable(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("malformed discovery response: {0}")]
    Malformed(String),
    #[error("{0} is not supported by this discovery source")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait DiscoverySource: Send + Sync + 'static {
    /// Running containers that pass `filter`.
    async fn list_running(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<ContainerSummary>, DiscoveryError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, DiscoveryError>;

    /// Push channel of lifecycle events. Sources without one keep the default.
    async fn subscribe(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let _ = filter;
        Err(DiscoveryError::Unsupported("event subscription"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DiscoveryFilter {
        DiscoveryFilter {
            name_prefix: "minio".to_string(),
            image: "minio/minio".to_string(),
            network: "dynamolike-network".to_string(),
        }
    }

    fn container() -> ContainerDetails {
        ContainerDetails {
            id: "abc".to_string(),
            name: "/minio-1".to_string(),
            image: "minio/minio".to_string(),
            running: true,
            networks: BTreeMap::from([(
                "dynamolike-network".to_string(),
                "172.18.0.2".to_string(),
            )]),
            ports: BTreeMap::from([(9000, 32768)]),
            env: vec![
                "MINIO_ROOT_USER=minio".to_string(),
                "MINIO_ROOT_PASSWORD=minio123".to_string(),
                "PATH=/usr/bin".to_string(),
            ],
        }
    }

    #[test]
    fn test_env_value_lookup() {
        let c = container();
        assert_eq!(c.env_value("MINIO_ROOT_USER"), Some("minio"));
        assert_eq!(c.env_value("MINIO_ROOT_PASSWORD"), Some("minio123"));
        assert_eq!(c.env_value("MINIO_ROOT"), None);
        assert_eq!(c.env_value("HOME"), None);
    }

    #[test]
    fn test_matches_filter() {
        assert!(container().matches(&filter()));

        let mut stopped = container();
        stopped.running = false;
        assert!(!stopped.matches(&filter()));

        let mut other_net = container();
        other_net.networks.clear();
        assert!(!other_net.matches(&filter()));

        let mut other_name = container();
        other_name.name = "/postgres".to_string();
        assert!(!other_name.matches(&filter()));
    }

    #[test]
    fn test_image_tag_matches() {
        let mut tagged = container();
        tagged.image = "minio/minio:RELEASE.2024".to_string();
        assert!(tagged.matches(&filter()));

        tagged.image = "minio/minio-extra".to_string();
        assert!(!tagged.matches(&filter()));
    }

    #[test]
    fn test_event_action_classification() {
        for up in ["start", "unpause", "enable"] {
            assert!(EventAction::parse(up).brings_up());
        }
        for down in ["stop", "pause", "die", "disable"] {
            assert!(EventAction::parse(down).takes_down());
        }
        let other = EventAction::parse("exec_create");
        assert!(!other.brings_up() && !other.takes_down());
    }

    #[test]
    fn test_event_action_metric_class() {
        assert_eq!(EventAction::parse("unpause").class(), "up");
        assert_eq!(EventAction::parse("die").class(), "down");
        assert_eq!(EventAction::parse("exec_create: sh -c ls").class(), "other");
        assert_eq!(EventAction::parse("health_status: healthy").class(), "other");
    }

    #[test]
    fn test_instance_debug_redacts_password() {
        let instance = Instance {
            id: "abc".to_string(),
            name: "minio-1".to_string(),
            ip: "10.0.0.2".to_string(),
            container_port: 9000,
            host_port: 32768,
            user: "minio".to_string(),
            password: "minio123".to_string(),
        };
        let rendered = format!("{:?}", instance);
        assert!(!rendered.contains("minio123"));
        assert_eq!(instance.endpoint(), "10.0.0.2:9000");
    }
}
