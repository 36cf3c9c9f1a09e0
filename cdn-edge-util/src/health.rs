use async_trait::async_trait;
use serde::Serialize;

/// Status reported by a single long-lived dependency for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub component: String,
    pub healthy: bool,
    pub message: String,
}

impl HealthStatus {
    pub fn ok(component: impl Into<String>) -> Self {
        HealthStatus {
            component: component.into(),
            healthy: true,
            message: "ok".to_string(),
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        HealthStatus {
            component: component.into(),
            healthy: false,
            message: message.into(),
        }
    }
}

/// Implemented by every store adapter, cache, worker pool, and registry so the
/// lifecycle layer can assemble a per-dependency status map without each
/// dependency needing to know about HTTP.
#[async_trait]
pub trait HealthStatusIndicator: Send + Sync {
    fn component_name(&self) -> &str;

    async fn check_health(&self) -> HealthStatus {
        HealthStatus::ok(self.component_name())
    }
}
