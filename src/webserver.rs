use axum::extract::State;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of the most recent autodeploy run, shared with the readiness probe.
#[derive(Clone, Default)]
pub struct Health {
    last_run_failed: Arc<AtomicBool>,
}

impl Health {
    pub fn record(&self, success: bool) {
        self.last_run_failed.store(!success, Ordering::Relaxed);
    }
}

pub async fn readiness_probe(State(health): State<Health>) -> impl IntoResponse {
    if health.last_run_failed.load(Ordering::Relaxed) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::NO_CONTENT
    }
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub fn create_app(health: Health) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(health)
}
