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

//! Discovery against the Docker Engine HTTP API.
//!
//! `DOCKER_HOST` may name the local socket (`unix:///var/run/docker.sock`,
//! the default) or a TCP endpoint (`tcp://host:2375`, `http(s)://...`).

use crate::discovery::{
    ContainerDetails, ContainerSummary, DiscoveryError, DiscoveryEvent, DiscoveryFilter,
    DiscoverySource,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the engine API is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEndpoint {
    /// Base URL such as `http://127.0.0.1:2375`
    Http(String),
    /// Path of the engine's unix socket
    Unix(PathBuf),
}

#[derive(Debug, Clone)]
enum Transport {
    Http {
        client: reqwest::Client,
        base_url: String,
    },
    #[cfg(unix)]
    Unix { socket: PathBuf },
}

/// Status plus a body that can be read chunk by chunk.
struct EngineResponse {
    status: StatusCode,
    body: EngineBody,
}

enum EngineBody {
    Http(reqwest::Response),
    #[cfg(unix)]
    Unix(hyper::body::Incoming),
}

impl EngineBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>, String> {
        match self {
            EngineBody::Http(response) => response.chunk().await.map_err(|e| e.to_string()),
            #[cfg(unix)]
            EngineBody::Unix(body) => loop {
                match body.frame().await {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(e.to_string()),
                    // Trailers carry no payload
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            return Ok(Some(data));
                        }
                    }
                }
            },
        }
    }

    async fn bytes(mut self) -> Result<Bytes, String> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

#[derive(Debug, Clone)]
pub struct DockerSource {
    endpoint: EngineEndpoint,
    transport: Transport,
}

impl DockerSource {
    pub fn new(docker_host: &str) -> Result<Self, DiscoveryError> {
        let endpoint = parse_docker_host(docker_host)?;
        let transport = match &endpoint {
            EngineEndpoint::Http(base_url) => Transport::Http {
                client: reqwest::Client::new(),
                base_url: base_url.clone(),
            },
            #[cfg(unix)]
            EngineEndpoint::Unix(socket) => Transport::Unix {
                socket: socket.clone(),
            },
            #[cfg(not(unix))]
            EngineEndpoint::Unix(_) => {
                return Err(DiscoveryError::Unsupported("unix socket docker hosts"))
            }
        };
        Ok(Self {
            endpoint,
            transport,
        })
    }

    /// Uses `DOCKER_HOST` when set, [`DEFAULT_DOCKER_HOST`] otherwise.
    pub fn from_env() -> Result<Self, DiscoveryError> {
        let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.to_string());
        Self::new(&host)
    }

    pub fn endpoint(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    /// Send `GET path?query` to the engine; the body is left unread.
    async fn open(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<EngineResponse, DiscoveryError> {
        let target = request_target(path, query)?;
        match &self.transport {
            Transport::Http { client, base_url } => {
                let response = client
                    .get(format!("{}{}", base_url, target))
                    .send()
                    .await
                    .map_err(|e| DiscoveryError::Unavailable(format!("GET {}: {}", path, e)))?;
                Ok(EngineResponse {
                    status: response.status(),
                    body: EngineBody::Http(response),
                })
            }
            #[cfg(unix)]
            Transport::Unix { socket } => unix_get(socket, &target)
                .await
                .map_err(|e| DiscoveryError::Unavailable(format!("GET {}: {}", path, e))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DiscoveryError> {
        let fetch = async {
            let response = self.open(path, query).await?;
            let status = response.status;
            if status == StatusCode::NOT_FOUND {
                return Err(DiscoveryError::NotFound(path.to_string()));
            }
            if !status.is_success() {
                return Err(DiscoveryError::Unavailable(format!(
                    "GET {} returned {}",
                    path, status
                )));
            }
            response
                .body
                .bytes()
                .await
                .map_err(|e| DiscoveryError::Unavailable(format!("GET {}: {}", path, e)))
        };

        let body = tokio::time::timeout(REQUEST_TIMEOUT, fetch)
            .await
            .map_err(|_| DiscoveryError::Unavailable(format!("GET {} timed out", path)))??;
        serde_json::from_slice(&body).map_err(|e| DiscoveryError::Malformed(e.to_string()))
    }
}

#[cfg(unix)]
async fn unix_get(
    socket: &std::path::Path,
    target: &str,
) -> Result<EngineResponse, Box<dyn std::error::Error + Send + Sync>> {
    let stream = tokio::net::UnixStream::connect(socket).await?;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Docker socket connection closed");
        }
    });

    let request = hyper::Request::builder()
        .method(hyper::Method::GET)
        .uri(target)
        .header(hyper::header::HOST, "docker")
        .body(http_body_util::Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await?;
    Ok(EngineResponse {
        status: response.status(),
        body: EngineBody::Unix(response.into_body()),
    })
}

#[async_trait]
impl DiscoverySource for DockerSource {
    async fn list_running(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<ContainerSummary>, DiscoveryError> {
        let containers: Vec<ApiContainer> = self
            .get_json("/containers/json", &[("filters", list_filters(filter))])
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                name: c.names.into_iter().next().unwrap_or_default(),
                id: c.id,
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, DiscoveryError> {
        let inspected: ApiInspect = self
            .get_json(&format!("/containers/{}/json", id), &[])
            .await
            .map_err(|e| match e {
                DiscoveryError::NotFound(_) => DiscoveryError::NotFound(id.to_string()),
                other => other,
            })?;
        Ok(inspected.into_details())
    }

    async fn subscribe(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let response = self
            .open("/events", &[("filters", event_filters(filter))])
            .await?;
        if !response.status.is_success() {
            return Err(DiscoveryError::Unavailable(format!(
                "GET /events returned {}",
                response.status
            )));
        }

        let mut body = response.body;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            loop {
                let chunk = match body.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Docker event stream interrupted");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_event_line(&line) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "Skipping malformed docker event"),
                    }
                }
            }
            tracing::info!("Docker event stream closed");
        });

        Ok(rx)
    }
}

/// Interpret a `DOCKER_HOST` value.
pub fn parse_docker_host(docker_host: &str) -> Result<EngineEndpoint, DiscoveryError> {
    let host = docker_host.trim();
    if let Some(path) = host.strip_prefix("unix://") {
        if path.is_empty() {
            return Err(DiscoveryError::Malformed(format!(
                "docker host {:?} has no socket path",
                docker_host
            )));
        }
        return Ok(EngineEndpoint::Unix(PathBuf::from(path)));
    }
    let host = host.trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("tcp://") {
        return Ok(EngineEndpoint::Http(format!("http://{}", rest)));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(EngineEndpoint::Http(host.to_string()));
    }
    if host.starts_with("npipe://") {
        return Err(DiscoveryError::Unsupported("named pipe docker hosts"));
    }
    Err(DiscoveryError::Malformed(format!(
        "unrecognised docker host {:?}",
        docker_host
    )))
}

/// `path?query` with the query form-encoded.
fn request_target(path: &str, query: &[(&str, String)]) -> Result<String, DiscoveryError> {
    let mut url = Url::parse(&format!("http://docker{}", path))
        .map_err(|e| DiscoveryError::Malformed(format!("{}: {}", path, e)))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in query {
            pairs.append_pair(name, value);
        }
    }
    Ok(match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    })
}

fn list_filters(filter: &DiscoveryFilter) -> String {
    let mut filters: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    filters.insert("status", vec!["running"]);
    if !filter.name_prefix.is_empty() {
        filters.insert("name", vec![filter.name_prefix.as_str()]);
    }
    if !filter.image.is_empty() {
        filters.insert("ancestor", vec![filter.image.as_str()]);
    }
    if !filter.network.is_empty() {
        filters.insert("network", vec![filter.network.as_str()]);
    }
    serde_json::json!(filters).to_string()
}

fn event_filters(filter: &DiscoveryFilter) -> String {
    let mut filters: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    filters.insert("type", vec!["container"]);
    if !filter.image.is_empty() {
        filters.insert("image", vec![filter.image.as_str()]);
    }
    serde_json::json!(filters).to_string()
}

fn parse_event_line(line: &[u8]) -> Result<Option<DiscoveryEvent>, DiscoveryError> {
    let trimmed = std::str::from_utf8(line)
        .map_err(|e| DiscoveryError::Malformed(e.to_string()))?
        .trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let event: ApiEvent =
        serde_json::from_str(trimmed).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    let action = event.action.or(event.status).unwrap_or_default();
    let actor_id = event
        .actor
        .and_then(|a| a.id)
        .or(event.id)
        .unwrap_or_default();

    if action.is_empty() || actor_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(DiscoveryEvent { action, actor_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiInspect {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: ApiState,
    #[serde(default)]
    config: ApiConfig,
    #[serde(default)]
    network_settings: ApiNetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiState {
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiNetworkSettings {
    #[serde(default)]
    networks: HashMap<String, ApiEndpoint>,
    #[serde(default)]
    ports: HashMap<String, Option<Vec<ApiPortBinding>>>,
}

#[derive(Debug, Deserialize)]
struct ApiEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct ApiPortBinding {
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    #[serde(rename = "Action")]
    action: Option<String>,
    status: Option<String>,
    #[serde(rename = "Actor")]
    actor: Option<ApiActor>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiActor {
    #[serde(rename = "ID")]
    id: Option<String>,
}

impl ApiInspect {
    fn into_details(self) -> ContainerDetails {
        let networks = self
            .network_settings
            .networks
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.ip_address))
            .collect();

        let ports = self
            .network_settings
            .ports
            .into_iter()
            .filter_map(|(spec, bindings)| {
                // "9000/tcp" -> 9000
                let container_port = spec.split('/').next()?.parse::<u16>().ok()?;
                let host_port = bindings?
                    .into_iter()
                    .find_map(|b| b.host_port.parse::<u16>().ok())?;
                Some((container_port, host_port))
            })
            .collect();

        ContainerDetails {
            id: self.id,
            name: self.name,
            image: self.config.image,
            running: self.state.running,
            networks,
            ports,
            env: self.config.env.unwrap_or_default(),
        }
    }
}
