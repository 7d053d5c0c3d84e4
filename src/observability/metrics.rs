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

/// Prometheus metrics definitions for dynamolike
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint", "status"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    /// HTTP request count
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Gateway Metrics
    // ============================================================================

    /// Requests routed to each partition
    pub static ref GATEWAY_ROUTED_TOTAL: CounterVec = register_counter_vec!(
        "gateway_routed_total",
        "Total number of requests routed to a storage node",
        &["operation", "node"]
    ).unwrap();

    /// Gateway request failures by kind
    pub static ref GATEWAY_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_errors_total",
        "Total number of failed gateway requests",
        &["operation", "kind"]
    ).unwrap();

    // ============================================================================
    // Discovery Metrics
    // ============================================================================

    /// Instances currently in the registry
    pub static ref REGISTRY_INSTANCES: Gauge = register_gauge!(
        "registry_instances",
        "Number of storage instances in the registry"
    ).unwrap();

    /// Discovery sweep duration in seconds
    pub static ref DISCOVERY_SWEEP_DURATION: HistogramVec = register_histogram_vec!(
        "discovery_sweep_duration_seconds",
        "Discovery sweep duration in seconds",
        &[],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Discovery failures (source unavailable, unresolvable instance)
    pub static ref DISCOVERY_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "discovery_errors_total",
        "Total number of discovery errors",
        &["kind"]
    ).unwrap();

    /// Lifecycle events received from push-based sources
    pub static ref DISCOVERY_EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "discovery_events_total",
        "Total number of discovery events received, by up/down/other class",
        &["class"]
    ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Increment HTTP request counter
pub fn increment_http_request(method: &str, endpoint: &str, status: &str) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, status])
        .inc();
}

/// Record HTTP request duration
pub fn record_http_duration(method: &str, endpoint: &str, status: &str, duration: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, endpoint, status])
        .observe(duration);
}

pub fn increment_gateway_route(operation: &str, node: usize) {
    GATEWAY_ROUTED_TOTAL
        .with_label_values(&[operation, &node.to_string()])
        .inc();
}

pub fn increment_gateway_error(operation: &str, kind: &str) {
    GATEWAY_ERRORS_TOTAL
        .with_label_values(&[operation, kind])
        .inc();
}

pub fn set_registry_instances(count: usize) {
    REGISTRY_INSTANCES.set(count as f64);
}

pub fn record_discovery_sweep(duration: f64) {
    DISCOVERY_SWEEP_DURATION
        .with_label_values(&[])
        .observe(duration);
}

pub fn increment_discovery_error(kind: &str) {
    DISCOVERY_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_discovery_event(class: &str) {
    DISCOVERY_EVENTS_TOTAL.with_label_values(&[class]).inc();
}

/// Gather all metrics for Prometheus exposition
pub fn gather_metrics() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = TextEncoder::new();
    // Use the default registry since our metrics are registered there
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    buffer
}
