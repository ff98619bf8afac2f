//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! viewer resolution and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use keyturn_core::config::KeyturnConfig;
use keyturn_core::error::KeyturnError;

use crate::auth;
use crate::handlers;
use crate::state::AppState;

fn cors_layer(config: &KeyturnConfig) -> CorsLayer {
    let port = config.general.port;
    let origins: Vec<HeaderValue> = [
        config.general.public_url.trim_end_matches('/').to_string(),
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/actions/{key}", get(handlers::landing))
        .route("/actions/{key}/consume", post(handlers::consume));

    let admin_routes = Router::new()
        .route(
            "/admin/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route("/admin/tokens/{id}", get(handlers::get_token))
        .route("/admin/tokens/cancel", post(handlers::cancel_tokens))
        .route("/admin/tokens/uncancel", post(handlers::uncancel_tokens))
        .route("/admin/actions", get(handlers::list_actions))
        .route_layer(axum::middleware::from_fn(auth::require_staff));

    public_routes
        .merge(admin_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_viewer,
        ))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured port.
///
/// Binds to 127.0.0.1 (localhost only).
pub async fn start_server(config: &KeyturnConfig, state: AppState) -> Result<(), KeyturnError> {
    let addr = format!("127.0.0.1:{}", config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| KeyturnError::Api(format!("Failed to bind: {}", e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| KeyturnError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
