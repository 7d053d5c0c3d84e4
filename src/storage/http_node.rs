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

//! Storage client for S3-compatible nodes speaking the path-style API
//! (`HEAD|PUT /{bucket}`, `PUT|GET /{bucket}/{key}`). Every request is
//! signed with SigV4 using the instance's credentials.

use crate::discovery::Instance;
use crate::storage::common::{validate_bucket, validate_key, DEFAULT_CONTENT_TYPE};
use crate::storage::sigv4::{self, CanonicalRequest, Signer};
use crate::storage::{
    NodeClient, NodeConnector, ObjectStream, RequestContext, StorageError, UploadReceipt,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG};
use reqwest::{Method, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    id: String,
    http: reqwest::Client,
    base: Url,
    signer: Signer,
    region: String,
}

impl HttpNodeClient {
    pub fn new(
        instance: &Instance,
        use_ssl: bool,
        region: &str,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let scheme = if use_ssl { "https" } else { "http" };
        let endpoint = instance.endpoint();
        let base = Url::parse(&format!("{}://{}/", scheme, endpoint))
            .map_err(|e| StorageError::InvalidInput(format!("endpoint {}: {}", endpoint, e)))?;
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        Ok(Self {
            id: instance.id.clone(),
            http,
            base,
            signer: Signer::new(&instance.user, &instance.password, region),
            region: region.to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `base/bucket[/key]`, encoded the way the signature expects.
    pub fn object_url(&self, bucket: &str, key: Option<&str>) -> Result<Url, StorageError> {
        let mut path = format!("/{}", sigv4::uri_encode(bucket, false));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&sigv4::uri_encode(key, true));
        }
        let mut url = self.base.clone();
        url.set_path(&path);
        Ok(url)
    }

    fn request(
        &self,
        ctx: &RequestContext,
        method: Method,
        url: Url,
        payload: &[u8],
    ) -> Result<reqwest::RequestBuilder, StorageError> {
        let timeout = match ctx.remaining() {
            Some(left) if left.is_zero() => return Err(StorageError::Timeout),
            other => other,
        };

        let payload_sha256 = sigv4::sha256_hex(payload);
        let amz_date = sigv4::amz_date(chrono::Utc::now());
        let canonical = CanonicalRequest {
            method: method.as_str(),
            path: url.path(),
            query: url.query().unwrap_or_default(),
            headers: vec![
                ("host", host_header(&url)?),
                ("x-amz-content-sha256", payload_sha256.clone()),
                ("x-amz-date", amz_date.clone()),
            ],
            payload_sha256: &payload_sha256,
        };
        let authorization = self.signer.authorization(&canonical, &amz_date)?;

        let mut builder = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, authorization)
            .header("x-amz-content-sha256", payload_sha256)
            .header("x-amz-date", amz_date)
            .header("x-request-id", &ctx.request_id);
        if let Some(left) = timeout {
            builder = builder.timeout(left);
        }
        Ok(builder)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StorageError> {
        builder.send().await.map_err(map_transport_error)
    }
}

/// Host header as reqwest sends it: the port only when it is not the scheme default.
fn host_header(url: &Url) -> Result<String, StorageError> {
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::InvalidInput(format!("{} has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn map_transport_error(e: reqwest::Error) -> StorageError {
    if e.is_timeout() {
        StorageError::Timeout
    } else if e.is_connect() {
        StorageError::Unreachable(e.to_string())
    } else {
        StorageError::Internal(e.to_string())
    }
}

async fn unexpected(response: reqwest::Response, op: &str) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StorageError::Internal(format!("{} returned {}: {}", op, status, body.trim()))
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn ensure_bucket(
        &self,
        ctx: &RequestContext,
        bucket: &str,
    ) -> Result<bool, StorageError> {
        validate_bucket(bucket)?;
        let url = self.object_url(bucket, None)?;

        let head = self
            .send(self.request(ctx, Method::HEAD, url.clone(), b"")?)
            .await?;
        if head.status().is_success() {
            tracing::info!(bucket, node_id = %self.id, "We already own bucket");
            return Ok(false);
        }

        let body = format!(
            "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
            self.region
        );
        let response = self
            .send(self.request(ctx, Method::PUT, url, body.as_bytes())?.body(body))
            .await?;

        match response.status() {
            s if s.is_success() => {
                tracing::info!(bucket, node_id = %self.id, "Successfully created bucket");
                Ok(true)
            }
            StatusCode::CONFLICT => Ok(false),
            _ => Err(unexpected(response, "create bucket").await),
        }
    }

    async fn get(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectStream, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let url = self.object_url(bucket, Some(key))?;
        let response = self.send(self.request(ctx, Method::GET, url, b"")?).await?;

        match response.status() {
            s if s.is_success() => Ok(ObjectStream::new(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(map_transport_error)),
            )),
            StatusCode::NOT_FOUND => Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(unexpected(response, "get object").await),
        }
    }

    async fn put(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<UploadReceipt, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let size = body.len() as u64;
        let url = self.object_url(bucket, Some(key))?;
        let response = self
            .send(
                self.request(ctx, Method::PUT, url.clone(), &body)?
                    .header(CONTENT_TYPE, DEFAULT_CONTENT_TYPE)
                    .body(body),
            )
            .await?;

        match response.status() {
            s if s.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string();
                Ok(UploadReceipt {
                    key: key.to_string(),
                    bucket: bucket.to_string(),
                    location: url.to_string(),
                    etag,
                    size,
                })
            }
            StatusCode::NOT_FOUND => Err(StorageError::BucketNotFound(bucket.to_string())),
            _ => Err(unexpected(response, "put object").await),
        }
    }
}

/// Connects to every instance over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    use_ssl: bool,
    region: String,
    connect_timeout: Duration,
}

impl HttpConnector {
    pub fn new(use_ssl: bool, region: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            use_ssl,
            region: region.into(),
            connect_timeout,
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(false, DEFAULT_REGION, Duration::from_secs(5))
    }
}

impl NodeConnector for HttpConnector {
    fn connect(&self, instance: &Instance) -> Result<Arc<dyn NodeClient>, StorageError> {
        let client =
            HttpNodeClient::new(instance, self.use_ssl, &self.region, self.connect_timeout)?;
        Ok(Arc::new(client))
    }
}
