use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers, ws, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(handlers::health))
        // Workspace state
        .route("/api/status", get(handlers::status))
        .route("/api/metrics", get(handlers::metrics))
        .route("/api/analysis", get(handlers::analysis))
        .route("/api/analysis/file", get(handlers::file_analysis))
        .route("/api/topology", get(handlers::topology))
        .route("/api/files", get(handlers::files))
        // Control
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::update_config),
        )
        .route(
            "/api/components/{name}/restart",
            post(handlers::restart_component),
        )
        // Real-time events
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
}
