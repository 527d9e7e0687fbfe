//! # API Endpoint Handlers
//!
//! Default routing for the inbound surface. Stubs, when registered, answer
//! before these handlers run.

use super::types::{ApiError, BatchParams, ErrorResponse, IdentityResponse, SettingsUpdate};
use crate::ops;
use crate::platform::Platform;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use minihull_core::{Collection, Ident, MinihullError, Record};
use serde_json::{Value, json};
use std::convert::Infallible;

/// Header carrying the calling connector's subscriber id.
pub const SUBSCRIBER_ID_HEADER: &str = "hull-app-id";

// =============================================================================
// IDENTITY
// =============================================================================

/// Organization descriptor.
pub async fn identity_handler(State(platform): State<Platform>) -> impl IntoResponse {
    Json(IdentityResponse::new(platform.org_addr()))
}

// =============================================================================
// GROUPS
// =============================================================================

/// All group definitions, in store order.
pub async fn groups_handler(State(platform): State<Platform>) -> impl IntoResponse {
    Json(platform.all(Collection::Groups).await)
}

/// One group definition.
pub async fn group_handler(
    State(platform): State<Platform>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    find_or_404(&platform, Collection::Groups, id).await
}

// =============================================================================
// SUBSCRIBERS
// =============================================================================

async fn find_or_404(
    platform: &Platform,
    collection: Collection,
    id: String,
) -> Result<Json<Record>, ApiError> {
    let ident = Ident::Id(id);
    platform
        .find(collection, &ident)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError(MinihullError::RecordNotFound {
                collection,
                ident: ident.to_string(),
            })
        })
}

fn header_subscriber_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(SUBSCRIBER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError(MinihullError::InvalidArguments(format!(
                "missing {} header",
                SUBSCRIBER_ID_HEADER
            )))
        })
}

async fn write_settings(
    platform: &Platform,
    id: String,
    update: SettingsUpdate,
) -> Result<Json<Record>, ApiError> {
    match platform.write_subscriber_settings(&id, &update.settings).await {
        Some(subscriber) => Ok(Json(subscriber)),
        None => Err(ApiError(MinihullError::RecordNotFound {
            collection: Collection::Subscribers,
            ident: id,
        })),
    }
}

/// Subscriber by id.
pub async fn subscriber_handler(
    State(platform): State<Platform>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    find_or_404(&platform, Collection::Subscribers, id).await
}

/// Merge settings into a subscriber by id.
pub async fn put_subscriber_handler(
    State(platform): State<Platform>,
    Path(id): Path<String>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Record>, ApiError> {
    write_settings(&platform, id, update).await
}

/// The calling subscriber, named by the identity header.
pub async fn app_handler(
    State(platform): State<Platform>,
    headers: HeaderMap,
) -> Result<Json<Record>, ApiError> {
    let id = header_subscriber_id(&headers)?;
    find_or_404(&platform, Collection::Subscribers, id).await
}

/// Merge settings into the calling subscriber.
pub async fn put_app_handler(
    State(platform): State<Platform>,
    headers: HeaderMap,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Record>, ApiError> {
    let id = header_subscriber_id(&headers)?;
    write_settings(&platform, id, update).await
}

// =============================================================================
// INGESTION SINKS
// =============================================================================

/// Accepts any event batch. The ledger keeps the body.
pub async fn firehose_handler() -> &'static str {
    "ok"
}

/// Static search capability tree.
pub async fn bootstrap_handler() -> impl IntoResponse {
    Json(json!({
        "tree": [{
            "text": "User",
            "children": [
                { "id": "id", "text": "Hull ID", "type": "string" },
                { "id": "email", "text": "Email", "type": "string", "default": null }
            ]
        }]
    }))
}

// =============================================================================
// BATCH DUMP
// =============================================================================

/// Newline-delimited JSON dump of entities with their group ids.
pub async fn batch_handler(
    State(platform): State<Platform>,
    Query(params): Query<BatchParams>,
) -> Response {
    let ids = params.id_list();
    let entities = platform.batch_dump(ids.as_deref()).await;
    let lines = entities.into_iter().map(|entity| {
        let mut line = Value::Object(entity).to_string();
        line.push('\n');
        Ok::<_, Infallible>(line)
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(futures::stream::iter(lines)),
    )
        .into_response()
}

// =============================================================================
// CONTROL SURFACE
// =============================================================================

/// Run a named platform operation.
pub async fn ops_handler(
    State(platform): State<Platform>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    let arguments = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError(MinihullError::InvalidArguments(format!(
                "body is not JSON: {}",
                e
            )))
        })?
    };
    ops::invoke(&platform, &name, arguments).await.map(Json).map_err(ApiError)
}

// =============================================================================
// FALLBACK
// =============================================================================

/// Generic not-found for unrouted, unstubbed requests.
pub async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not Found")))
}
