//! Mapping of lookup failures onto HTTP responses.
//!
//! Every failure is answered with a JSON body `{"error": "<message>"}`:
//!
//! - Caller mistakes ([`Error::is_client_error`]) are `400 Bad Request`.
//! - [`Error::ServiceShutdown`] is `503 Service Unavailable`.
//! - Any other lookup failure is `500 Internal Server Error`.
//! - A body over the size limit is `413 Payload Too Large`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use voxseg::Error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Lookup(#[from] Error),

    /// The request body could not be read or decoded.
    #[error("{message}")]
    Rejection { status: StatusCode, message: String },
}

impl ApiError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::Lookup(Error::InvalidInput {
            reason: reason.into(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Lookup(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Lookup(Error::ServiceShutdown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Lookup(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Rejection { status, .. } => *status,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxseg::{BlockKey, StoreError};

    #[test]
    fn maps_statuses() {
        assert_eq!(
            ApiError::invalid_input("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::LimitExceeded { max: 1, count: 2 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::ServiceShutdown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let fetch = Error::FetchFailure {
            key: BlockKey { x: 0, y: 0, z: 0 },
            source: StoreError::Decode {
                reason: "truncated".to_string(),
            },
        };
        assert_eq!(
            ApiError::from(fetch).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let rejected = ApiError::Rejection {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "too big".to_string(),
        };
        assert_eq!(rejected.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn message_is_error_display() {
        let err = ApiError::from(Error::LimitExceeded {
            max: 1_000_000,
            count: 1_000_001,
        });
        assert_eq!(err.to_string(), "Max number of locations (1000000) exceeded");
    }
}
