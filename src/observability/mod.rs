/// Observability module for metrics, tracing, and health checks
pub mod health;
pub mod metrics;
pub mod tracing_setup;
