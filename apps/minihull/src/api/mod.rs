//! # minihull HTTP API Module
//!
//! The inbound surface connectors under test talk to, built with axum.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/` - Organization identity
//! - `GET /api/v1/groups` - All group definitions
//! - `GET /api/v1/groups/{id}` - One group definition
//! - `GET|PUT /api/v1/subscribers/app` - Calling subscriber (`hull-app-id` header)
//! - `GET|PUT /api/v1/subscribers/{id}` - Subscriber settings
//! - `POST /api/v1/firehose` - Event batch sink
//! - `POST /api/v1/extract/{kind}` - Extract request sink
//! - `GET /api/v1/search/bootstrap` - Static search capabilities
//! - `GET /_batch` - NDJSON entity dump (`?ids=a,b` to restrict)
//! - `POST /_ops/{name}` - Run a platform operation by name
//!
//! Any other request answers a JSON 404, unless a stub matches it.
//!
//! ## Middleware (outer to inner)
//!
//! 1. Tracing
//! 2. CORS (permissive, connectors run on arbitrary origins)
//! 3. Body limit
//! 4. Ledger capture
//! 5. Stub lookup

mod capture;
mod handlers;
mod types;

pub use capture::{MAX_CAPTURED_BODY, capture_middleware, stub_middleware};
pub use handlers::SUBSCRIBER_ID_HEADER;
pub use types::{
    ApiError, BatchParams, ErrorResponse, IdentityResponse, SettingsUpdate, status_for,
};

use crate::platform::{API_PREFIX, Platform};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
pub fn create_router(platform: Platform) -> Router {
    let api = |path: &str| format!("{API_PREFIX}{path}");

    Router::new()
        .route(API_PREFIX, get(handlers::identity_handler))
        .route(&api("/"), get(handlers::identity_handler))
        .route(&api("/groups"), get(handlers::groups_handler))
        .route(&api("/groups/{id}"), get(handlers::group_handler))
        .route(
            &api("/subscribers/app"),
            get(handlers::app_handler).put(handlers::put_app_handler),
        )
        .route(
            &api("/subscribers/{id}"),
            get(handlers::subscriber_handler).put(handlers::put_subscriber_handler),
        )
        .route(&api("/firehose"), post(handlers::firehose_handler))
        .route(&api("/extract/{kind}"), post(handlers::firehose_handler))
        .route(&api("/search/bootstrap"), get(handlers::bootstrap_handler))
        .route("/_batch", get(handlers::batch_handler))
        .route("/_ops/{name}", post(handlers::ops_handler))
        .fallback(handlers::not_found_handler)
        // Layers added after the fallback so unrouted paths are stubbed and
        // captured too.
        .layer(axum_middleware::from_fn_with_state(
            platform.clone(),
            stub_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            platform.clone(),
            capture_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_CAPTURED_BODY))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(platform)
}
