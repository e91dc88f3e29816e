//! HTTP surface
//!
//! The axum router, bearer-token auth middleware, and server lifecycle.
//! Every route except the health check requires the configured token; with
//! no token configured the service runs open, which is meant for
//! development only.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::export::Exporter;
use crate::llm::Triager;
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::repository::Database;

/// Shared state behind every handler
pub struct AppState {
    pub db: Database,
    pub exporter: Exporter,
    pub triager: Option<Triager>,
    pub notifier: Option<Notifier>,
    pub metrics: Arc<Metrics>,
    pub auth_token: Option<String>,
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/iocs/check", get(handlers::check_ioc))
        .route("/api/v1/iocs/search", get(handlers::search_ioc))
        .route("/api/v1/iocs/feed", get(handlers::ioc_feed))
        .route("/api/v1/webhooks/sentinelone", post(handlers::edr_webhook))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bearer-token check applied to every route except the health check.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.metrics.inc_http_requests();

    if request.uri().path() == "/api/v1/health" {
        return next.run(request).await;
    }

    let Some(expected) = &state.auth_token else {
        // Development mode: no token configured
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if provided == Some(format!("Bearer {}", expected).as_str()) {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

/// Run the API server until ctrl-c.
pub async fn serve(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    if state.auth_token.is_none() {
        warn!("REST_API_AUTH_TOKEN not set, authentication disabled");
    }

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("API server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(auth_token: Option<&str>) -> Arc<AppState> {
        let db = Database::open_memory().unwrap();
        Arc::new(AppState {
            db: db.clone(),
            exporter: Exporter::new(db),
            triager: None,
            notifier: None,
            metrics: Arc::new(Metrics::new()),
            auth_token: auth_token.map(String::from),
        })
    }

    #[test]
    fn test_router_builds() {
        let _open = router(state(None));
        let _locked = router(state(Some("secret")));
    }
}
