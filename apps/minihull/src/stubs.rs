//! # Stub Registry
//!
//! Canned responses that take precedence over default routing.
//!
//! A stub is a `(method, path pattern)` pair with a response. Patterns are
//! matched segment by segment against the request path (query excluded):
//!
//! - a literal segment matches itself
//! - `:name` matches any single segment
//! - a trailing `*` matches any remainder, including nothing
//!
//! The most recently registered matching stub wins. Registering the same
//! `(method, pattern)` again replaces the earlier stub in place.

use axum::Json;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Canned response for a stubbed route.
#[derive(Debug, Clone, PartialEq)]
pub struct StubResponse {
    pub status: StatusCode,
    /// `None` answers with an empty body.
    pub body: Option<Value>,
}

impl IntoResponse for StubResponse {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

#[derive(Debug, Clone)]
struct Stub {
    /// `None` matches every method.
    method: Option<Method>,
    pattern: String,
    response: StubResponse,
}

impl Stub {
    fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && pattern_matches(&self.pattern, path)
    }
}

/// Whether `path` satisfies `pattern`.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_segments = pattern.trim_matches('/').split('/');
    let mut path_segments = path.trim_matches('/').split('/');
    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (Some("*"), _) => return pattern_segments.next().is_none(),
            (Some(expected), Some(actual)) => {
                let param = expected.starts_with(':') && !actual.is_empty();
                if !param && expected != actual {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Ordered list of stubs consulted before default routing.
#[derive(Debug, Default)]
pub struct StubRegistry {
    stubs: RwLock<Vec<Stub>>,
}

impl StubRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Stub>> {
        self.stubs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Stub>> {
        self.stubs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Start programming a stub for `method` on `pattern`.
    pub fn stub(&self, method: Method, pattern: impl Into<String>) -> Responder<'_> {
        Responder {
            registry: self,
            method: Some(method),
            pattern: pattern.into(),
        }
    }

    pub fn stub_get(&self, pattern: impl Into<String>) -> Responder<'_> {
        self.stub(Method::GET, pattern)
    }

    pub fn stub_post(&self, pattern: impl Into<String>) -> Responder<'_> {
        self.stub(Method::POST, pattern)
    }

    pub fn stub_put(&self, pattern: impl Into<String>) -> Responder<'_> {
        self.stub(Method::PUT, pattern)
    }

    pub fn stub_delete(&self, pattern: impl Into<String>) -> Responder<'_> {
        self.stub(Method::DELETE, pattern)
    }

    /// Stub every method on `pattern`.
    pub fn stub_all(&self, pattern: impl Into<String>) -> Responder<'_> {
        Responder {
            registry: self,
            method: None,
            pattern: pattern.into(),
        }
    }

    fn install(&self, stub: Stub) {
        let mut stubs = self.write();
        let existing = stubs
            .iter()
            .position(|s| s.method == stub.method && s.pattern == stub.pattern);
        tracing::debug!(pattern = %stub.pattern, method = ?stub.method, "Stub registered");
        match existing {
            Some(index) => {
                stubs.remove(index);
                stubs.push(stub);
            }
            None => stubs.push(stub),
        }
    }

    /// Response for a request, if any stub matches it.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<StubResponse> {
        self.read()
            .iter()
            .rev()
            .find(|s| s.matches(method, path))
            .map(|s| s.response.clone())
    }

    /// Remove every stub.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of registered stubs.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Pending stub registration. Nothing is registered until a `respond*`
/// method is called.
#[must_use = "a stub is only registered once a response is given"]
pub struct Responder<'a> {
    registry: &'a StubRegistry,
    method: Option<Method>,
    pattern: String,
}

impl Responder<'_> {
    /// Answer with `body` as JSON and status 200.
    pub fn respond(self, body: Value) {
        self.respond_with(StatusCode::OK, body);
    }

    /// Answer with `body` as JSON and the given status.
    pub fn respond_with(self, status: StatusCode, body: Value) {
        self.finish(StubResponse {
            status,
            body: Some(body),
        });
    }

    /// Answer with an empty body and the given status.
    pub fn respond_status(self, status: StatusCode) {
        self.finish(StubResponse { status, body: None });
    }

    fn finish(self, response: StubResponse) {
        self.registry.install(Stub {
            method: self.method,
            pattern: self.pattern,
            response,
        });
    }
}
