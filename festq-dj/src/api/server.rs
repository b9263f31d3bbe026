//! HTTP server setup and routing

use crate::config::Config;
use crate::error::{Error, Result};
use crate::service::DjService;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{auth_middleware, handlers, sse};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<DjService>,
    /// Operator authentication secret; 0 disables checking
    pub shared_secret: i64,
}

/// Build the full router
pub fn build_router(ctx: AppContext) -> Router {
    let admin = Router::new()
        .route("/tracks", post(handlers::add_track))
        .route("/tracks/:track_id", delete(handlers::remove_track))
        .route("/rounds", post(handlers::open_round))
        .route("/rounds/:round_id/close", post(handlers::close_round))
        .route("/queue", post(handlers::enqueue))
        .route("/queue/promote", post(handlers::promote_top))
        .route("/playback/skip", post(handlers::skip))
        .route("/playback/finished", post(handlers::track_finished));

    let api = Router::new()
        .route("/tracks", get(handlers::list_tracks))
        .route("/rounds/current", get(handlers::current_round))
        .route("/votes", post(handlers::cast_vote))
        .route("/queue", get(handlers::get_queue))
        .route("/playback", get(handlers::get_playback))
        .route("/events", get(sse::event_stream))
        .route("/events/replay", get(sse::replay))
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth_middleware::role_claim,
        ))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run(
    config: &Config,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);

    info!("Starting HTTP server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", config.bind_addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
