//! `/v1/realms` routes (§6): the thinnest possible `axum` surface over the façade (C7). Request
//! bodies are parsed with plain `axum::Json`/`Path`/`Query` extraction — no content negotiation,
//! no pagination beyond what §6 specifies, matching SPEC_FULL.md §4's scoping of this layer.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::extract::AuthenticatedCaller;
use crate::http::ApiError;
use crate::realm::model::{Label, Resource};

pub fn make_router<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/", get(list_realms))
        .route("/{id}", get(get_realm).put(put_realm).delete(delete_realm))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ResourceList {
    total: usize,
    #[serde(rename = "_results")]
    results: Vec<Resource>,
}

/// `GET /v1/realms` — `realms/read`; returns every known realm sorted by `createdAt` ascending.
async fn list_realms(State(state): State<AppState>, AuthenticatedCaller(caller): AuthenticatedCaller) -> Result<impl IntoResponse, ApiError> {
    let results = state.facade.list(&caller)?;
    Ok(Json(ResourceList {
        total: results.len(),
        results,
    }))
}

#[derive(Debug, Deserialize)]
struct RevQuery {
    rev: Option<u64>,
}

/// `GET /v1/realms/{id}` — `realms/read`; `?rev=` replays the historical state as of that revision.
async fn get_realm(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Path(id): Path<Label>,
    Query(query): Query<RevQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let resource = match query.rev {
        Some(rev) => state.facade.get_at_revision(&caller, &id, rev).await?,
        None => state.facade.get(&caller, &id)?,
    };
    match resource {
        Some(resource) => Ok((axum::http::StatusCode::OK, Json(resource)).into_response()),
        None => Ok(axum::http::StatusCode::NOT_FOUND.into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct RealmWrite {
    name: String,
    #[serde(rename = "openIdConfig")]
    open_id_config: url::Url,
    logo: Option<url::Url>,
}

/// `PUT /v1/realms/{id}` — `realms/write`; creates the realm (201) if `?rev=` is absent, else
/// updates it (200), enforcing optimistic concurrency against the provided revision.
async fn put_realm(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Path(id): Path<Label>,
    Query(query): Query<RevQuery>,
    Json(body): Json<RealmWrite>,
) -> Result<impl IntoResponse, ApiError> {
    let metadata = match query.rev {
        None => {
            let metadata = state.facade.create(&caller, id, body.name, body.open_id_config, body.logo).await?;
            return Ok((axum::http::StatusCode::CREATED, Json(metadata)));
        }
        Some(rev) => {
            state
                .facade
                .update(&caller, id, rev, body.name, body.open_id_config, body.logo)
                .await?
        }
    };
    Ok((axum::http::StatusCode::OK, Json(metadata)))
}

/// `DELETE /v1/realms/{id}?rev=` — `realms/write`; deprecates the realm, enforcing the revision.
async fn delete_realm(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Path(id): Path<Label>,
    Query(query): Query<RevQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rev = query.rev.ok_or_else(|| {
        ApiError::from(crate::error::IamError::InternalError {
            reason: "DELETE /v1/realms/{id} requires a ?rev= query parameter".to_owned(),
        })
    })?;
    let metadata = state.facade.deprecate(&caller, id, rev).await?;
    Ok(Json(metadata))
}
