//! # CounselHub API
//!
//! The HTTP tier of CounselHub. It exposes availability, slot, booking and
//! dispute endpoints over the services of `counselhub-engine`.
//!
//! ## Architecture
//!
//! - **Routes**: Define API endpoints and URL structure
//! - **Handlers**: Decode requests, call the engine, encode responses
//! - **Middleware**: Actor extraction and error mapping
//! - **Config**: Handle environment and application configuration
//!
//! Callers are identified by the `x-actor-id` and `x-actor-role` headers,
//! which the upstream gateway sets after verifying the user.

/// Configuration module for API settings
pub mod config;
/// Request handlers
pub mod handlers;
/// Middleware for actor extraction and error handling
pub mod middleware;
/// Route definitions and API endpoint structure
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use counselhub_engine::Engine;
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

/// Shared application state that is accessible to all request handlers
pub struct ApiState {
    /// Marketplace services
    pub engine: Engine,
}

/// Builds the router with every endpoint attached to `state`
pub fn app(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health check endpoints
        .merge(routes::health::routes())
        // Availability, materialization and slot status endpoints
        .merge(routes::availability::routes())
        // Booking and dispute endpoints
        .merge(routes::bookings::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Starts the API server
///
/// Installs the log subscriber, applies CORS and timeout layers, serves
/// stored dispute evidence under `/evidence` when `evidence_dir` is given,
/// and listens on the configured address until the process exits.
pub async fn start_server(
    config: config::ApiConfig,
    engine: Engine,
    evidence_dir: Option<PathBuf>,
) -> Result<()> {
    // Initialize tracing for logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let state = Arc::new(ApiState { engine });
    let app = app(state);

    let app = match evidence_dir {
        Some(dir) => app.nest_service("/evidence", ServeDir::new(dir)),
        None => app,
    };

    // Apply CORS configuration if origins are specified
    let app = if let Some(origins) = &config.cors_origins {
        let origins = origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .wrap_err("Invalid API_CORS_ORIGINS entry")?;
        let cors = tower_http::cors::CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::header::ACCEPT,
                middleware::auth::ACTOR_ID_HEADER.clone(),
                middleware::auth::ACTOR_ROLE_HEADER.clone(),
            ])
            .allow_origin(origins)
            .allow_credentials(true);

        app.layer(cors)
    } else {
        app
    };

    // Add request timeout middleware
    let app = app.layer(
        tower::ServiceBuilder::new()
            .layer(axum::error_handling::HandleErrorLayer::new(middleware::error_handling::handle_timeout))
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .into_inner(),
    );

    // Start the HTTP server
    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
