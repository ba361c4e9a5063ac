//! C5 — the cluster-replicated read index: last-writer-wins by revision.
//!
//! A real deployment replicates this across nodes; this crate stands in with a `dashmap`-backed
//! in-memory table, matching the teacher's `TokenCache = Mutex<HashMap<...>>` style but using
//! `dashmap` for the higher write-concurrency the projector (C6) and the façade (C7) both need.

use std::sync::Arc;

use dashmap::DashMap;

use super::model::{Label, Resource};

/// Read-side lookup of realm resources, kept up to date by the projector (C6).
///
/// `put` is idempotent under replay (P6): applying the same `(id, rev)` twice, or an
/// out-of-order older revision, never regresses the stored value.
pub trait RealmIndex: Send + Sync {
    fn put(&self, resource: Resource);

    fn get(&self, id: &Label) -> Option<Resource>;

    fn list(&self) -> Vec<Resource>;

    /// Looks up the (non-deprecated) realm whose issuer is `issuer`, used by the token verifier.
    fn find_by_issuer(&self, issuer: &str) -> Option<Resource>;
}

#[derive(Default)]
pub struct InMemoryRealmIndex {
    by_id: DashMap<Label, Resource>,
}

impl InMemoryRealmIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl RealmIndex for InMemoryRealmIndex {
    fn put(&self, resource: Resource) {
        match self.by_id.entry(resource.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if resource.rev > occupied.get().rev {
                    occupied.insert(resource);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(resource);
            }
        }
    }

    fn get(&self, id: &Label) -> Option<Resource> {
        self.by_id.get(id).map(|entry| entry.value().clone())
    }

    fn list(&self) -> Vec<Resource> {
        self.by_id.iter().map(|entry| entry.value().clone()).collect()
    }

    fn find_by_issuer(&self, issuer: &str) -> Option<Resource> {
        self.by_id
            .iter()
            .find(|entry| entry.value().active_issuer() == Some(issuer))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::model::{ActiveProjection, ResourceValue, SubjectId, RESOURCE_TYPE};
    use std::collections::BTreeSet;
    use time::OffsetDateTime;

    fn active_resource(id: &str, rev: u64, issuer: &str) -> Resource {
        let now = OffsetDateTime::now_utc();
        Resource {
            id: id.parse().unwrap(),
            rev,
            types: [RESOURCE_TYPE],
            created_at: now,
            created_by: SubjectId::Anonymous,
            updated_at: now,
            updated_by: SubjectId::Anonymous,
            deprecated: false,
            value: ResourceValue::Active(ActiveProjection {
                name: "Example".to_owned(),
                open_id_config: "https://example.com/.well-known/openid-configuration".parse().unwrap(),
                issuer: issuer.to_owned(),
                grant_types: BTreeSet::new(),
                logo: None,
                authorization_endpoint: "https://example.com/auth".parse().unwrap(),
                token_endpoint: "https://example.com/token".parse().unwrap(),
                user_info_endpoint: "https://example.com/userinfo".parse().unwrap(),
                revocation_endpoint: None,
                end_session_endpoint: None,
                keys: vec![],
            }),
        }
    }

    #[test]
    fn put_is_last_writer_wins_by_rev() {
        let index = InMemoryRealmIndex::new();
        index.put(active_resource("acme", 2, "https://example.com"));
        index.put(active_resource("acme", 1, "https://example.com"));
        let stored = index.get(&"acme".parse().unwrap()).unwrap();
        assert_eq!(stored.rev, 2, "an older revision must never regress a newer one");
    }

    #[test]
    fn put_same_rev_is_idempotent() {
        let index = InMemoryRealmIndex::new();
        index.put(active_resource("acme", 1, "https://example.com"));
        index.put(active_resource("acme", 1, "https://example.com"));
        assert_eq!(index.list().len(), 1);
    }

    #[test]
    fn find_by_issuer_locates_active_realm() {
        let index = InMemoryRealmIndex::new();
        index.put(active_resource("acme", 1, "https://issuer.example.com"));
        let found = index.find_by_issuer("https://issuer.example.com").unwrap();
        assert_eq!(found.id, "acme".parse().unwrap());
        assert!(index.find_by_issuer("https://unknown.example.com").is_none());
    }
}
