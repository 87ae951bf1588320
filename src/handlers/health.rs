//! # Health Check Handler
//!
//! Liveness endpoint for load balancers and monitoring.

use axum::Json;
use serde_json::{json, Value};

/// GET /health
///
/// ```json
/// { "status": "healthy", "service": "passkey-bridge" }
/// ```
///
/// Never touches the stores, so it answers even when storage is down.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
    }))
}
