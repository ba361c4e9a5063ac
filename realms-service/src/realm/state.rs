//! C3 — the realm aggregate's state machine: two free functions over closed sum types, no I/O.
//!
//! `next` folds an accepted event into a new state and is total (I1: every `(state, event)` pair
//! produced by `evaluate` has a defined `next`). `evaluate` is the only place a command is
//! accepted or rejected.

use time::OffsetDateTime;

use super::errors::RealmRejection;
use super::model::{Command, RealmEvent, RealmState};

/// Folds an event onto a state. Total: every reachable `(state, event)` pair is handled.
pub fn next(state: &RealmState, event: &RealmEvent) -> RealmState {
    match event {
        RealmEvent::RealmCreated {
            id,
            rev,
            fields,
            instant,
            subject,
        } => RealmState::Active {
            id: id.clone(),
            rev: *rev,
            fields: fields.clone(),
            audit: super::model::Audit {
                created_at: *instant,
                created_by: subject.clone(),
                updated_at: *instant,
                updated_by: subject.clone(),
            },
        },
        RealmEvent::RealmUpdated {
            id,
            rev,
            fields,
            instant,
            subject,
        } => {
            let created = match state {
                RealmState::Active { audit, .. } | RealmState::Deprecated { audit, .. } => {
                    (audit.created_at, audit.created_by.clone())
                }
                RealmState::Initial => (*instant, subject.clone()),
            };
            RealmState::Active {
                id: id.clone(),
                rev: *rev,
                fields: fields.clone(),
                audit: super::model::Audit {
                    created_at: created.0,
                    created_by: created.1,
                    updated_at: *instant,
                    updated_by: subject.clone(),
                },
            }
        }
        RealmEvent::RealmDeprecated {
            id,
            rev,
            instant,
            subject,
        } => {
            let (created_at, created_by, name, open_id_config, logo) = match state {
                RealmState::Active { fields, audit, .. } => (
                    audit.created_at,
                    audit.created_by.clone(),
                    fields.name.clone(),
                    fields.open_id_config.clone(),
                    fields.logo.clone(),
                ),
                RealmState::Deprecated { fields, audit, .. } => (
                    audit.created_at,
                    audit.created_by.clone(),
                    fields.name.clone(),
                    fields.open_id_config.clone(),
                    fields.logo.clone(),
                ),
                RealmState::Initial => (*instant, subject.clone(), String::new(), default_url(), None),
            };
            RealmState::Deprecated {
                id: id.clone(),
                rev: *rev,
                fields: super::model::DeprecatedFields {
                    name,
                    open_id_config,
                    logo,
                },
                audit: super::model::Audit {
                    created_at,
                    created_by,
                    updated_at: *instant,
                    updated_by: subject.clone(),
                },
            }
        }
    }
}

fn default_url() -> url::Url {
    #[allow(clippy::unwrap_used)]
    "about:blank".parse().unwrap()
}

/// Validates a command against the current state and, if accepted, produces the resulting event.
///
/// Transition table (§4.3):
/// - `Initial` accepts only `Create`.
/// - `Active` accepts `Update` (rev must match) and `Deprecate` (rev must match).
/// - `Deprecated` accepts `Update` (revives to `Active`, I3) but rejects `Deprecate` again.
pub fn evaluate(state: &RealmState, command: Command, now: OffsetDateTime) -> Result<RealmEvent, RealmRejection> {
    match (state, command) {
        (RealmState::Initial, Command::Create { id, subject, fields }) => Ok(RealmEvent::RealmCreated {
            id,
            rev: 1,
            fields,
            instant: now,
            subject,
        }),
        (RealmState::Active { id, .. } | RealmState::Deprecated { id, .. }, Command::Create { .. }) => {
            Err(RealmRejection::RealmAlreadyExists(id.clone()))
        }

        (RealmState::Initial, Command::Update { id, .. } | Command::Deprecate { id, .. }) => {
            Err(RealmRejection::RealmNotFound(id))
        }

        (
            RealmState::Active { rev: current_rev, .. } | RealmState::Deprecated { rev: current_rev, .. },
            Command::Update {
                id,
                prior_rev,
                subject,
                fields,
            },
        ) => {
            if prior_rev != *current_rev {
                return Err(RealmRejection::IncorrectRev {
                    provided: prior_rev,
                    expected: *current_rev,
                });
            }
            Ok(RealmEvent::RealmUpdated {
                id,
                rev: current_rev + 1,
                fields,
                instant: now,
                subject,
            })
        }

        (
            RealmState::Active { rev: current_rev, .. },
            Command::Deprecate {
                id,
                prior_rev,
                subject,
            },
        ) => {
            if prior_rev != *current_rev {
                return Err(RealmRejection::IncorrectRev {
                    provided: prior_rev,
                    expected: *current_rev,
                });
            }
            Ok(RealmEvent::RealmDeprecated {
                id,
                rev: current_rev + 1,
                instant: now,
                subject,
            })
        }

        (RealmState::Deprecated { id, .. }, Command::Deprecate { .. }) => Err(RealmRejection::RealmAlreadyDeprecated(id.clone())),
    }
}
