use crate::gateway::GatewayError;
use crate::handler::BaseHandler;
use crate::observability::{health, metrics};
use crate::storage::common::DEFAULT_CONTENT_TYPE;
use crate::storage::RequestContext;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// PUT bodies are buffered before forwarding, so they are capped.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Per-deployment response settings
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub request_id_prefix: String,
    /// Deadline handed to the storage client; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// Larger request bodies are rejected with 413
    pub max_body_bytes: usize,
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new("", None)
    }
}

impl ResponseContext {
    pub fn new(request_id_prefix: impl Into<String>, request_timeout: Option<Duration>) -> Self {
        Self {
            request_id_prefix: request_id_prefix.into(),
            request_timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn request_id(&self) -> String {
        format!("{}{}", self.request_id_prefix, uuid::Uuid::new_v4())
    }
}

/// Request id assigned by the middleware, readable by handlers.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Object HTTP handler wrapping BaseHandler
#[derive(Clone)]
pub struct ObjectHttpHandler {
    handler: Arc<BaseHandler>,
    ctx: ResponseContext,
}

impl ObjectHttpHandler {
    pub fn new(handler: BaseHandler) -> Self {
        Self::new_with_context(handler, ResponseContext::default())
    }

    pub fn new_with_context(handler: BaseHandler, ctx: ResponseContext) -> Self {
        Self {
            handler: Arc::new(handler),
            ctx,
        }
    }

    /// Create the router for the object API
    pub fn router(self) -> Router {
        Router::new()
            .route("/object/:id", get(get_object).put(put_object))
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_endpoint))
            .layer(DefaultBodyLimit::max(self.ctx.max_body_bytes))
            .layer(middleware::from_fn_with_state(self.clone(), tag_request))
            .with_state(self)
    }

    fn request_context(&self, request_id: &str) -> RequestContext {
        let ctx = RequestContext::new(request_id);
        match self.ctx.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// Assign a request id, echo it on the response and record HTTP metrics.
async fn tag_request(
    State(app): State<ObjectHttpHandler>,
    mut req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = app.ctx.request_id();
    let method = req.method().to_string();
    let endpoint = endpoint_label(req.uri().path());

    req.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(req).await;

    match HeaderValue::from_str(&request_id) {
        Ok(value) => {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request id is not a valid header")
        }
    }

    let status = response.status().as_u16().to_string();
    metrics::increment_http_request(&method, endpoint, &status);
    metrics::record_http_duration(&method, endpoint, &status, start.elapsed().as_secs_f64());
    response
}

/// Collapse object paths so metrics do not grow a label per key.
fn endpoint_label(path: &str) -> &'static str {
    if path.starts_with("/object/") {
        "/object/:id"
    } else if path == "/health" {
        "/health"
    } else if path == "/metrics" {
        "/metrics"
    } else {
        "other"
    }
}

/// Request failure as seen by the client: always a bare 500.
#[derive(Debug)]
struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(kind = self.0.kind(), "Mapping gateway error to 500");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}

/// GET /object/{id} - Fetch object from its partition
async fn get_object(
    State(app): State<ObjectHttpHandler>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = app.request_context(&request_id);
    let object = app.handler.gateway.get(&ctx, &id).await.map_err(|e| {
        tracing::error!(request_id = %request_id, key = %id, error = %e, "Failed to get object");
        e
    })?;

    tracing::debug!(request_id = %request_id, key = %id, "Streaming object");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE)],
        Body::from_stream(object),
    ))
}

/// PUT /object/{id} - Store object on its partition
async fn put_object(
    State(app): State<ObjectHttpHandler>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = app.request_context(&request_id);
    let receipt = app.handler.gateway.put(&ctx, &id, body).await.map_err(|e| {
        tracing::error!(request_id = %request_id, key = %id, error = %e, "Failed to put object");
        e
    })?;

    tracing::info!(
        request_id = %request_id,
        key = %receipt.key,
        bucket = %receipt.bucket,
        size = receipt.size,
        "Object stored"
    );
    Ok((
        StatusCode::OK,
        format!(
            "Key: {}, Bucket: {}, Location: {}",
            receipt.key, receipt.bucket, receipt.location
        ),
    ))
}

/// GET /health - Registry and gateway status
async fn health_check(State(app): State<ObjectHttpHandler>) -> Response {
    let status =
        health::get_health_status(&app.handler.registry, &app.handler.gateway).await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    match serde_json::to_string(&status) {
        Ok(json) => (code, [(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize health status");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// GET /metrics - Prometheus exposition
async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::static_source::StaticSource;
    use crate::discovery::{DiscoveryFilter, Instance, ResolveOptions, ServiceRegistry};
    use crate::gateway::GatewayBuilder;
    use crate::storage::in_memory::InMemoryConnector;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn create_test_handler(ids: &[&str]) -> ObjectHttpHandler {
        let registry = Arc::new(ServiceRegistry::new(
            Arc::new(StaticSource::default()),
            ResolveOptions::new(DiscoveryFilter {
                name_prefix: String::new(),
                image: String::new(),
                network: String::new(),
            }),
        ));
        for id in ids {
            registry
                .add_instance(
                    *id,
                    Instance {
                        id: id.to_string(),
                        name: format!("minio-{}", id),
                        ip: "127.0.0.1".to_string(),
                        container_port: 9000,
                        host_port: 9000,
                        user: String::new(),
                        password: String::new(),
                    },
                )
                .await;
        }
        let gateway = GatewayBuilder::new(Arc::new(InMemoryConnector::new()))
            .build(&registry)
            .await
            .unwrap();
        ObjectHttpHandler::new_with_context(
            BaseHandler::new(Arc::new(gateway), registry),
            ResponseContext::new("test-", None),
        )
    }

    #[test]
    fn test_endpoint_label() {
        assert_eq!(endpoint_label("/object/abc"), "/object/:id");
        assert_eq!(endpoint_label("/health"), "/health");
        assert_eq!(endpoint_label("/"), "other");
    }

    #[tokio::test]
    async fn test_put_and_get_object() {
        let app = create_test_handler(&["a", "b"]).await.router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/object/object-1")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Key: object-1, Bucket: bucket-name, Location: memory://"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/object/object-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            DEFAULT_CONTENT_TYPE
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_oversized_put_rejected() {
        let handler = create_test_handler(&["a"]).await;
        let app = ObjectHttpHandler {
            ctx: handler.ctx.clone().with_body_limit(16),
            ..handler
        }
        .router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/object/big")
                    .body(Body::from(vec![b'x'; 17]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/object/small")
                    .body(Body::from(vec![b'x'; 16]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_id_prefix() {
        let app = create_test_handler(&["a"]).await.router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/object/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(id.starts_with("test-"));
    }
}
