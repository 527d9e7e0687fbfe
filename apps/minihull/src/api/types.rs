//! # API Request/Response Types
//!
//! JSON structures for the inbound surface, and the mapping from
//! [`MinihullError`] to HTTP status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use minihull_core::{MinihullError, Record};
use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTITY
// =============================================================================

/// Organization descriptor returned by `GET /api/v1/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub id: String,
    pub name: String,
    pub domain: String,
}

impl IdentityResponse {
    pub fn new(domain: String) -> Self {
        Self {
            id: "minihull".to_string(),
            name: "minihull".to_string(),
            domain,
        }
    }
}

// =============================================================================
// SUBSCRIBER SETTINGS
// =============================================================================

/// Body of a settings write. Connectors may send either field name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, alias = "private_settings")]
    pub settings: Record,
}

// =============================================================================
// BATCH
// =============================================================================

/// Query of `GET /_batch`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchParams {
    /// Comma-separated entity ids.
    #[serde(default, alias = "users")]
    pub ids: Option<String>,
}

impl BatchParams {
    /// Requested ids, or `None` for every entity.
    pub fn id_list(&self) -> Option<Vec<String>> {
        self.ids.as_ref().map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Replacement operation, for removed operation names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            replacement: None,
        }
    }
}

/// HTTP status for a core error.
pub fn status_for(error: &MinihullError) -> StatusCode {
    match error {
        MinihullError::RecordNotFound { .. }
        | MinihullError::SnapshotNotFound(_)
        | MinihullError::UnknownOperation(_) => StatusCode::NOT_FOUND,
        MinihullError::InvalidArguments(_) | MinihullError::DeserializationError(_) => {
            StatusCode::BAD_REQUEST
        }
        MinihullError::RemovedOperation { .. } => StatusCode::GONE,
        MinihullError::DuplicateId { .. } => StatusCode::CONFLICT,
        MinihullError::OutboundFailed(_) => StatusCode::BAD_GATEWAY,
        MinihullError::SerializationError(_) | MinihullError::IoError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Core error carried to the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub MinihullError);

impl From<MinihullError> for ApiError {
    fn from(error: MinihullError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorResponse {
            error: self.0.to_string(),
            replacement: match &self.0 {
                MinihullError::RemovedOperation { replacement, .. } => {
                    Some((*replacement).to_string())
                }
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minihull_core::Collection;

    #[test]
    fn error_statuses() {
        let not_found = MinihullError::RecordNotFound {
            collection: Collection::Groups,
            ident: "g".to_string(),
        };
        assert_eq!(status_for(&not_found), StatusCode::NOT_FOUND);
        let removed = MinihullError::RemovedOperation {
            name: "mimicInstall".to_string(),
            replacement: "install",
        };
        assert_eq!(status_for(&removed), StatusCode::GONE);
        assert_eq!(
            status_for(&MinihullError::IoError("disk".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn batch_ids_split_on_commas() {
        let params = BatchParams {
            ids: Some("a, b,,c".to_string()),
        };
        assert_eq!(
            params.id_list(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(BatchParams::default().id_list(), None);
    }
}
