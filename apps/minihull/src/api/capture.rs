//! # Capture and Stub Middleware
//!
//! Two layers wrap every route, including the fallback:
//!
//! - `capture_middleware` (outer) appends the request to the ledger as
//!   soon as it is received, lets the inner layers answer, then releases
//!   ledger waits. Error responses are captured like any other.
//! - `stub_middleware` (inner) answers from the stub registry when a stub
//!   matches, bypassing the route handler.

use crate::ledger::{Direction, Exchange};
use crate::platform::Platform;
use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Largest request body buffered for capture (2 MB).
pub const MAX_CAPTURED_BODY: usize = 2 * 1024 * 1024;

/// Record the request in the ledger, then release waits once answered.
pub async fn capture_middleware(
    State(platform): State<Platform>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ledger = platform.ledger();
    let (parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_CAPTURED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let exchange = Exchange::inbound(&parts.method, &parts.uri, &parts.headers, &[]);
            let position = ledger.append(Direction::Inbound, exchange);
            tracing::warn!(path = %parts.uri.path(), "Request body rejected: {}", e);
            let response = (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
            ledger.publish(Direction::Inbound, position);
            return response;
        }
    };

    let exchange = Exchange::inbound(&parts.method, &parts.uri, &parts.headers, &bytes);
    let position = ledger.append(Direction::Inbound, exchange);
    let response = next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await;
    ledger.publish(Direction::Inbound, position);
    response
}

/// Answer from a matching stub instead of the route handler.
pub async fn stub_middleware(
    State(platform): State<Platform>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match platform
        .stubs()
        .lookup(request.method(), request.uri().path())
    {
        Some(stub) => {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "Answered from stub"
            );
            stub.into_response()
        }
        None => next.run(request).await,
    }
}
