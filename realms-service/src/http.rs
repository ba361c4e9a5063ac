//! HTTP error rendering — the `RealmRejection`/`TokenRejection`/`IamError` → status code mapping
//! of §7, as a structured JSON body. Adapted from the teacher's `HttpError`/`HttpErrorBuilder`:
//! same `#[track_caller]`-captured location and `tracing::error!` on render, but carrying a JSON
//! payload instead of a bare status code, since this API's callers parse the rejection kind.

use core::panic::Location;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::IamError;
use crate::realm::errors::RealmRejection;
use crate::realms::FacadeError;
use crate::token::TokenRejection;

pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    loc: &'static Location<'static>,
}

impl ApiError {
    #[track_caller]
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            loc: Location::caller(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, kind = self.kind, loc = %self.loc, "request rejected: {}", self.message);
        (
            self.status,
            Json(json!({
                "error": self.kind,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<&RealmRejection> for ApiError {
    #[track_caller]
    fn from(rejection: &RealmRejection) -> Self {
        let status = match rejection {
            RealmRejection::RealmAlreadyExists(_) => StatusCode::CONFLICT,
            RealmRejection::RealmNotFound(_) => StatusCode::NOT_FOUND,
            RealmRejection::RealmAlreadyDeprecated(_) => StatusCode::CONFLICT,
            RealmRejection::IncorrectRev { .. } => StatusCode::CONFLICT,
            RealmRejection::DuplicateIssuer { .. } => StatusCode::CONFLICT,
            RealmRejection::WellKnown(_) => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, "realm_rejection", rejection.to_string())
    }
}

impl From<RealmRejection> for ApiError {
    #[track_caller]
    fn from(rejection: RealmRejection) -> Self {
        ApiError::from(&rejection)
    }
}

impl From<&TokenRejection> for ApiError {
    #[track_caller]
    fn from(rejection: &TokenRejection) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, "invalid_access_token", rejection.to_string())
    }
}

impl From<TokenRejection> for ApiError {
    #[track_caller]
    fn from(rejection: TokenRejection) -> Self {
        ApiError::from(&rejection)
    }
}

impl From<&IamError> for ApiError {
    #[track_caller]
    fn from(error: &IamError) -> Self {
        let status = match error {
            IamError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            IamError::OperationTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            IamError::InternalError { .. } | IamError::UnexpectedInitialState(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, "iam_error", error.to_string())
    }
}

impl From<IamError> for ApiError {
    #[track_caller]
    fn from(error: IamError) -> Self {
        ApiError::from(&error)
    }
}

impl From<FacadeError> for ApiError {
    #[track_caller]
    fn from(error: FacadeError) -> Self {
        match error {
            FacadeError::Rejection(rejection) => rejection.into(),
            FacadeError::Iam(iam) => iam.into(),
        }
    }
}
