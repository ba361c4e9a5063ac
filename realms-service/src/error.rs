//! `IamError` — the infrastructure error taxonomy (§7), orthogonal to `RealmRejection` and
//! `TokenRejection`: failures of the surrounding machinery rather than rejections of a request.

use thiserror::Error;

use crate::acl::Permission;

#[derive(Error, Debug)]
pub enum IamError {
    #[error("caller is not permitted to {permission:?} `{resource}`")]
    AccessDenied { resource: String, permission: Permission },

    #[error("operation timed out: {reason}")]
    OperationTimedOut { reason: String },

    #[error("internal error: {reason}")]
    InternalError { reason: String },

    /// Defensive: the aggregate observed a command against a state it should never be in. Must
    /// never fire in practice; its presence documents that `evaluate` is believed total over the
    /// reachable state space.
    #[error("unexpected initial state for realm `{0}`")]
    UnexpectedInitialState(crate::realm::model::Label),
}
