//! Axum extractor turning `Authorization: Bearer <jwt>` into a [`Caller`] (§6). Adapted from the
//! teacher's `extract.rs` (`FromRequestParts` impls delegating to an `Extension`/`State` lookup),
//! generalized here to run token verification inline rather than reading a pre-populated claim.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crate::api::AppState;
use crate::http::ApiError;
use crate::realm::model::Caller;

/// The authenticated (or anonymous) principal for the current request.
pub struct AuthenticatedCaller(pub Caller);

impl FromRequestParts<AppState> for AuthenticatedCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|header| header.0.token().to_owned());

        let caller = state.facade.caller(bearer.as_deref())?;
        Ok(Self(caller))
    }
}
