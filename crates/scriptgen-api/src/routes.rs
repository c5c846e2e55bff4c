//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::scripts::{
    delete_script, finalize_script, generate_script, get_job_result, get_script, get_segments,
    list_user_scripts, split_script, update_script,
};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;
use crate::ws::ws_handler;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let script_routes = Router::new()
        .route("/scripts/generate", post(generate_script))
        .route("/scripts/result/:job_id", get(get_job_result))
        .route("/scripts/user/:user_id", get(list_user_scripts))
        .route(
            "/scripts/:script_id",
            get(get_script).put(update_script).delete(delete_script),
        )
        .route("/scripts/:script_id/finalize", post(finalize_script))
        .route(
            "/scripts/:script_id/split",
            post(split_script).get(get_segments),
        )
        .layer(TimeoutLayer::new(state.config.request_timeout));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", script_routes)
        .route("/ws", get(ws_handler))
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
