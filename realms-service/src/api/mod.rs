//! The in-process HTTP layer exposing C7's façade under `/v1/realms` (§6). Grounded in the
//! teacher's `api/mod.rs` (one `make_router` per resource, nested under the root router) and
//! `DgwState` (one `Clone`-able struct threading shared state into every handler via `State`).

pub mod realms;

use std::sync::Arc;

use axum::Router;

use crate::realms::RealmsFacade;

/// Root application state, threaded into every handler via `axum::extract::State`. Mirrors the
/// teacher's `DgwState`: a single `Clone`-cheap struct wrapping `Arc`-shared collaborators rather
/// than ambient singletons (§9's design note).
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<RealmsFacade>,
}

pub fn make_router(state: AppState) -> Router {
    Router::new().nest("/v1/realms", realms::make_router(state))
}
