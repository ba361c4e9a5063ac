//! C7 — the realms façade: the only entry point callers (HTTP handlers, tests) use.
//!
//! Stateless itself; each write (1) resolves the caller, (2) checks an ACL permission, (3)
//! submits a command to the aggregate (C4), (4) best-effort refreshes the index (C5) for that id,
//! (5) returns a `ResourceMetadata`. Reads go straight to the index. Grounded in the teacher's
//! `GatewayState`-as-root-context pattern: one struct threading the journal/index/HTTP
//! client/clock explicitly rather than through ambient singletons (§9's design note).

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use url::Url;

use crate::acl::{AclsAccessor, Permission};
use crate::error::IamError;
use crate::realm::aggregate::RealmAggregate;
use crate::realm::errors::RealmRejection;
use crate::realm::index::RealmIndex;
use crate::realm::model::{Caller, Command, Label, Resource, ResourceMetadata, SubjectId};
use crate::retry::RetryPolicy;
use crate::token::{self, TokenRejection};
use crate::wellknown::{self, HttpJson};

/// Either a domain rejection (§7's `RealmRejection`) or an infrastructure failure (`IamError`),
/// the two orthogonal taxonomies the façade's write path can surface.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error(transparent)]
    Rejection(#[from] RealmRejection),
    #[error(transparent)]
    Iam(#[from] IamError),
}

pub struct RealmsFacade {
    aggregate: Arc<RealmAggregate>,
    index: Arc<dyn RealmIndex>,
    http: Arc<dyn HttpJson>,
    retry: RetryPolicy,
    acls: AclsAccessor,
    command_timeout: Duration,
}

impl RealmsFacade {
    pub fn new(
        aggregate: Arc<RealmAggregate>,
        index: Arc<dyn RealmIndex>,
        http: Arc<dyn HttpJson>,
        retry: RetryPolicy,
        acls: AclsAccessor,
        command_timeout: Duration,
    ) -> Self {
        Self {
            aggregate,
            index,
            http,
            retry,
            acls,
            command_timeout,
        }
    }

    fn require_permission(&self, caller: &Caller, id: &Label, permission: Permission) -> Result<(), FacadeError> {
        let path = format!("realms/{id}");
        let acls = (self.acls)();
        if acls.has_permission(&path, permission, caller) {
            Ok(())
        } else {
            Err(IamError::AccessDenied {
                resource: path,
                permission,
            }
            .into())
        }
    }

    /// Authenticates a bearer token into a [`Caller`] (§4.2); absent credentials are anonymous.
    pub fn caller(&self, bearer: Option<&str>) -> Result<Caller, TokenRejection> {
        match bearer {
            None => Ok(Caller::anonymous()),
            Some(token) => token::verify(token, &self.index, OffsetDateTime::now_utc()),
        }
    }

    pub async fn create(
        &self,
        caller: &Caller,
        id: Label,
        name: String,
        open_id_config: Url,
        logo: Option<Url>,
    ) -> Result<ResourceMetadata, FacadeError> {
        self.require_permission(caller, &id, Permission::Create)?;

        let resolved = self.resolve_well_known(&id, &open_id_config).await?;
        let subject = subject_of(caller);

        let command = Command::Create {
            id: id.clone(),
            subject,
            fields: resolved.into_fields(name, open_id_config, logo),
        };
        self.submit(&id, command).await
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: Label,
        prior_rev: u64,
        name: String,
        open_id_config: Url,
        logo: Option<Url>,
    ) -> Result<ResourceMetadata, FacadeError> {
        self.require_permission(caller, &id, Permission::Update)?;

        let resolved = self.resolve_well_known(&id, &open_id_config).await?;
        let subject = subject_of(caller);

        let command = Command::Update {
            id: id.clone(),
            prior_rev,
            subject,
            fields: resolved.into_fields(name, open_id_config, logo),
        };
        self.submit(&id, command).await
    }

    pub async fn deprecate(&self, caller: &Caller, id: Label, prior_rev: u64) -> Result<ResourceMetadata, FacadeError> {
        self.require_permission(caller, &id, Permission::Deprecate)?;

        let subject = subject_of(caller);
        let command = Command::Deprecate {
            id: id.clone(),
            prior_rev,
            subject,
        };
        self.submit(&id, command).await
    }

    pub fn get(&self, caller: &Caller, id: &Label) -> Result<Option<Resource>, FacadeError> {
        self.require_permission(caller, id, Permission::Read)?;
        Ok(self.index.get(id))
    }

    /// Fetches `id` as of a past revision by replaying its journal directly, bypassing the index
    /// (which only ever holds the latest projected `Resource`).
    pub async fn get_at_revision(&self, caller: &Caller, id: &Label, rev: u64) -> Result<Option<Resource>, FacadeError> {
        self.require_permission(caller, id, Permission::Read)?;
        let state = self
            .aggregate
            .at_revision(id, rev)
            .await
            .map_err(|error| IamError::InternalError { reason: error.to_string() })?;
        Ok(Resource::from_current(&state))
    }

    /// `list` returns the index's values sorted by `createdAt` ascending (§4.7).
    pub fn list(&self, caller: &Caller) -> Result<Vec<Resource>, FacadeError> {
        // Any single realm read check stands in for a blanket `realms/read` check; the ACL
        // collaborator is expected to recognize the catch-all `realms` path for list operations.
        let path_check = "realms".to_owned();
        let acls = (self.acls)();
        if !acls.has_permission(&path_check, Permission::Read, caller) {
            return Err(IamError::AccessDenied {
                resource: path_check,
                permission: Permission::Read,
            }
            .into());
        }

        let mut resources = self.index.list();
        resources.sort_by_key(|r| r.created_at);
        Ok(resources)
    }

    async fn resolve_well_known(&self, id: &Label, open_id_config: &Url) -> Result<wellknown::WellKnown, FacadeError> {
        let resolved = wellknown::resolve(self.http.as_ref(), open_id_config, &self.retry)
            .await
            .map_err(RealmRejection::from)?;

        if let Some(existing) = self.index.find_by_issuer(&resolved.issuer) {
            if existing.id != *id {
                return Err(RealmRejection::DuplicateIssuer {
                    issuer: resolved.issuer,
                    other: existing.id,
                }
                .into());
            }
        }

        Ok(resolved)
    }

    async fn submit(&self, id: &Label, command: Command) -> Result<ResourceMetadata, FacadeError> {
        let outcome = tokio::time::timeout(self.command_timeout, self.aggregate.dispatch(id, command))
            .await
            .map_err(|_| IamError::OperationTimedOut {
                reason: format!("command against realm `{id}` exceeded the command-evaluation timeout"),
            })?
            .map_err(|error| IamError::InternalError { reason: error.to_string() })?;

        let state = outcome?;

        let resource = Resource::from_current(&state).ok_or_else(|| IamError::UnexpectedInitialState(id.clone()))?;
        self.index.put(resource.clone());
        Ok(ResourceMetadata::from(&resource))
    }
}

fn subject_of(caller: &Caller) -> SubjectId {
    match &caller.subject {
        crate::realm::model::Identity::User { subject, realm } => SubjectId::User {
            subject: subject.clone(),
            realm: realm.clone(),
        },
        _ => SubjectId::Anonymous,
    }
}

impl wellknown::WellKnown {
    fn into_fields(self, name: String, open_id_config: Url, logo: Option<Url>) -> crate::realm::model::RealmFields {
        crate::realm::model::RealmFields {
            name,
            open_id_config,
            issuer: self.issuer,
            keys: self.keys,
            grant_types: self.grant_types,
            logo,
            endpoints: self.endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::always_allow;
    use crate::realm::index::InMemoryRealmIndex;
    use crate::realm::journal::memory::{InMemoryJournal, InMemorySnapshotStore};
    use async_trait::async_trait;

    struct FixtureHttp {
        config: serde_json::Value,
        jwks: serde_json::Value,
    }

    #[async_trait]
    impl HttpJson for FixtureHttp {
        async fn get_json(&self, url: &Url) -> anyhow::Result<serde_json::Value> {
            if url.path().ends_with("openid-configuration") {
                Ok(self.config.clone())
            } else {
                Ok(self.jwks.clone())
            }
        }
    }

    fn facade(issuer: &str) -> RealmsFacade {
        let config = serde_json::json!({
            "issuer": issuer,
            "jwks_uri": "https://issuer.example.com/jwks",
            "authorization_endpoint": "https://issuer.example.com/auth",
            "token_endpoint": "https://issuer.example.com/token",
            "userinfo_endpoint": "https://issuer.example.com/userinfo",
            "grant_types_supported": ["authorization_code", "refresh_token"],
        });
        let jwks = serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": "k1",
                "n": "AQAB",
                "e": "AQAB",
            }]
        });

        RealmsFacade::new(
            Arc::new(RealmAggregate::new(Arc::new(InMemoryJournal::new()), Arc::new(InMemorySnapshotStore::new()))),
            Arc::new(InMemoryRealmIndex::new()),
            Arc::new(FixtureHttp { config, jwks }),
            RetryPolicy::Never,
            always_allow(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let facade = facade("https://accounts.google.com");
        let caller = Caller::anonymous();
        let id: Label = "google".parse().unwrap();

        let created = facade
            .create(
                &caller,
                id.clone(),
                "Google".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(created.rev, 1);
        assert!(!created.deprecated);

        let fetched = facade.get(&caller, &id).unwrap().unwrap();
        assert_eq!(fetched.rev, 1);
    }

    #[tokio::test]
    async fn stale_update_rev_surfaces_as_a_rejection() {
        let facade = facade("https://accounts.google.com");
        let caller = Caller::anonymous();
        let id: Label = "google".parse().unwrap();
        facade
            .create(
                &caller,
                id.clone(),
                "Google".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap();

        let err = facade
            .update(
                &caller,
                id.clone(),
                99,
                "Google v2".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Rejection(RealmRejection::IncorrectRev { .. })));
    }

    #[tokio::test]
    async fn deprecate_then_create_is_rejected_as_already_exists() {
        let facade = facade("https://accounts.google.com");
        let caller = Caller::anonymous();
        let id: Label = "google".parse().unwrap();
        facade
            .create(
                &caller,
                id.clone(),
                "Google".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap();
        facade.deprecate(&caller, id.clone(), 1).await.unwrap();

        let err = facade
            .create(
                &caller,
                id.clone(),
                "Google".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Rejection(RealmRejection::RealmAlreadyExists(_))));
    }

    /// Returns discovery documents whose `issuer` is derived from the requested host, so distinct
    /// realms resolve to distinct issuers instead of tripping the duplicate-issuer rejection.
    struct MultiIssuerHttp;

    #[async_trait]
    impl HttpJson for MultiIssuerHttp {
        async fn get_json(&self, url: &Url) -> anyhow::Result<serde_json::Value> {
            if url.path().ends_with("openid-configuration") {
                let issuer = format!("https://{}", url.host_str().unwrap());
                Ok(serde_json::json!({
                    "issuer": issuer,
                    "jwks_uri": format!("{issuer}/jwks"),
                    "authorization_endpoint": format!("{issuer}/auth"),
                    "token_endpoint": format!("{issuer}/token"),
                    "userinfo_endpoint": format!("{issuer}/userinfo"),
                    "grant_types_supported": ["authorization_code"],
                }))
            } else {
                Ok(serde_json::json!({
                    "keys": [{
                        "kty": "RSA",
                        "use": "sig",
                        "alg": "RS256",
                        "kid": "k1",
                        "n": "AQAB",
                        "e": "AQAB",
                    }]
                }))
            }
        }
    }

    /// Regression test: creating a second, distinct realm must not conflict with the first one's
    /// journal append (the optimistic-concurrency check is per realm id, not journal-wide).
    #[tokio::test]
    async fn creating_two_distinct_realms_both_succeed() {
        let facade = RealmsFacade::new(
            Arc::new(RealmAggregate::new(Arc::new(InMemoryJournal::new()), Arc::new(InMemorySnapshotStore::new()))),
            Arc::new(InMemoryRealmIndex::new()),
            Arc::new(MultiIssuerHttp),
            RetryPolicy::Never,
            always_allow(),
            Duration::from_secs(5),
        );
        let caller = Caller::anonymous();

        let first = facade
            .create(
                &caller,
                "google".parse().unwrap(),
                "Google".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(first.rev, 1);

        let second = facade
            .create(
                &caller,
                "acme".parse().unwrap(),
                "Acme".to_owned(),
                "https://accounts.acme.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(second.rev, 1);
    }

    #[tokio::test]
    async fn duplicate_issuer_across_ids_is_rejected() {
        let facade = facade("https://accounts.google.com");
        let caller = Caller::anonymous();
        facade
            .create(
                &caller,
                "google".parse().unwrap(),
                "Google".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap();

        let err = facade
            .create(
                &caller,
                "google-2".parse().unwrap(),
                "Google Clone".to_owned(),
                "https://accounts.google.com/.well-known/openid-configuration".parse().unwrap(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Rejection(RealmRejection::DuplicateIssuer { .. })));
    }
}
