//! HTTP server startup
//!
//! Every handler reaches the session manager through the shared `ApiState`.
//! Background persistence runs on its own OS threads and is drained on shutdown.

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    api::{self, ApiState},
    config::Config,
    session_manager::SessionManager,
    shared_state::SharedState,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Run the HTTP server until ctrl-c.
pub async fn run_thread_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let addr = cfg.api_addr()?;
    let shared_state = Arc::new(SharedState::new(cfg)?);
    let sessions = Arc::new(SessionManager::new(Arc::clone(&shared_state)));

    let app = build_router(ApiState { sessions });

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining pending writes");
    shared_state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;
    crate::metrics::inc_request(&route, response.status().as_str());
    response
}

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/sessions", post(api::create_session).get(api::list_sessions))
        .route(
            "/api/v1/sessions/:id",
            axum::routing::patch(api::update_session).delete(api::delete_session),
        )
        .route("/api/v1/sessions/:id/chat", post(api::chat))
        .route("/api/v1/sessions/:id/chat/stream", post(api::chat_stream))
        .route("/api/v1/sessions/:id/history", get(api::get_history))
        .route_layer(middleware::from_fn(track_requests))
        .route("/health", get(api::health))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
