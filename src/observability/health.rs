/// Health reporting for the registry and the gateway's node table
use serde::{Deserialize, Serialize};

use crate::discovery::ServiceRegistry;
use crate::gateway::Gateway;

/// Overall health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub checks: Vec<HealthCheck>,
}

/// Individual health check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub duration_ms: f64,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Healthy while at least one instance is registered
pub async fn check_registry_health(registry: &ServiceRegistry) -> HealthCheck {
    let start = std::time::Instant::now();
    let count = registry.len().await;

    HealthCheck {
        name: "registry".to_string(),
        status: if count > 0 { "healthy" } else { "unhealthy" }.to_string(),
        message: Some(format!("{} instances registered", count)),
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Healthy when every partition has a client
pub fn check_gateway_health(gateway: &Gateway) -> HealthCheck {
    let start = std::time::Instant::now();
    let served = gateway.len();
    let partitions = gateway.node_count();

    HealthCheck {
        name: "gateway".to_string(),
        status: if served == partitions {
            "healthy"
        } else {
            "unhealthy"
        }
        .to_string(),
        message: Some(format!("{} of {} partitions served", served, partitions)),
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Get overall health status by running all checks
pub async fn get_health_status(registry: &ServiceRegistry, gateway: &Gateway) -> HealthStatus {
    let checks = vec![
        check_registry_health(registry).await,
        check_gateway_health(gateway),
    ];

    let all_healthy = checks.iter().all(|c| c.status == "healthy");

    HealthStatus {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
    }
}
