use serde::Serialize;
use utoipa::ToSchema;

/// Payload returned by `/healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" while no card store is installed.
    pub status: String,
}

impl HealthResponse {
    /// The card store is installed and reachable.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    /// No card store installed; pooled and deck endpoints will return 503.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
        }
    }
}
