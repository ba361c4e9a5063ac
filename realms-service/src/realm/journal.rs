//! Event storage abstraction shared by the aggregate (C4) and the projector (C6).
//!
//! Grounded in the `async-trait` `Job`/`JobQueue` shape from the teacher's job-queue crate: a
//! small async trait plus an in-memory implementation usable both in production (single node)
//! and in tests.

use async_trait::async_trait;

use super::model::{Label, RealmEvent, RealmState};

/// An ordered, append-only log of [`RealmEvent`]s, taggable by realm id (C4) or read in full
/// sequence order (C6's projector).
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Appends `event`, optimistically concurrency-checked against `expected_seq` — the number of
    /// events already recorded for `event`'s own realm id, *not* a journal-wide counter (Akka
    /// persistence semantics: the conflict check is per persistence-id). Fails if another writer
    /// already appended for this id in between.
    async fn append(&self, event: RealmEvent, expected_seq: u64) -> anyhow::Result<u64>;

    /// All events recorded for `id`, oldest first.
    async fn events_for(&self, id: &Label) -> anyhow::Result<Vec<RealmEvent>>;

    /// The full stream strictly after `after_seq`, in append order, for the projector (C6).
    async fn tail(&self, after_seq: u64) -> anyhow::Result<Vec<(u64, RealmEvent)>>;

    /// The journal's current sequence number (the seq of the most recent append, or 0 if empty).
    async fn current_seq(&self) -> anyhow::Result<u64>;
}

/// Periodic snapshots of aggregate state, keyed by realm id and revision (C4's recovery path:
/// replay from the latest snapshot, then tail events after it).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, id: &Label, rev: u64, state: &RealmState) -> anyhow::Result<()>;

    /// The most recent snapshot at or below `id`'s current known revision, if any.
    async fn load_latest(&self, id: &Label) -> anyhow::Result<Option<(u64, RealmState)>>;
}

/// In-memory [`EventJournal`], used in production for a single-node deployment (per the spec's
/// non-goals: no cross-process replication of the journal itself) and in tests.
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryJournal {
        events: Mutex<Vec<RealmEvent>>,
    }

    impl InMemoryJournal {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl EventJournal for InMemoryJournal {
        async fn append(&self, event: RealmEvent, expected_seq: u64) -> anyhow::Result<u64> {
            let mut events = self.events.lock().expect("journal mutex poisoned");
            let current_for_id = events.iter().filter(|e| e.id() == event.id()).count() as u64;
            if expected_seq != current_for_id {
                anyhow::bail!(
                    "journal append conflict for realm `{}`: expected seq {current_for_id}, got {expected_seq}",
                    event.id()
                );
            }
            events.push(event);
            Ok(events.len() as u64)
        }

        async fn events_for(&self, id: &Label) -> anyhow::Result<Vec<RealmEvent>> {
            let events = self.events.lock().expect("journal mutex poisoned");
            Ok(events.iter().filter(|e| e.id() == id).cloned().collect())
        }

        async fn tail(&self, after_seq: u64) -> anyhow::Result<Vec<(u64, RealmEvent)>> {
            let events = self.events.lock().expect("journal mutex poisoned");
            Ok(events
                .iter()
                .enumerate()
                .skip(after_seq as usize)
                .map(|(i, e)| (i as u64 + 1, e.clone()))
                .collect())
        }

        async fn current_seq(&self) -> anyhow::Result<u64> {
            let events = self.events.lock().expect("journal mutex poisoned");
            Ok(events.len() as u64)
        }
    }

    #[derive(Default)]
    pub struct InMemorySnapshotStore {
        snapshots: Mutex<std::collections::HashMap<Label, (u64, RealmState)>>,
    }

    impl InMemorySnapshotStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SnapshotStore for InMemorySnapshotStore {
        async fn save(&self, id: &Label, rev: u64, state: &RealmState) -> anyhow::Result<()> {
            let mut snapshots = self.snapshots.lock().expect("snapshot mutex poisoned");
            snapshots.insert(id.clone(), (rev, state.clone()));
            Ok(())
        }

        async fn load_latest(&self, id: &Label) -> anyhow::Result<Option<(u64, RealmState)>> {
            let snapshots = self.snapshots.lock().expect("snapshot mutex poisoned");
            Ok(snapshots.get(id).cloned())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::realm::model::SubjectId;
        use time::OffsetDateTime;

        fn event(id: &str, rev: u64) -> RealmEvent {
            RealmEvent::RealmDeprecated {
                id: id.parse().unwrap(),
                rev,
                instant: OffsetDateTime::now_utc(),
                subject: SubjectId::Anonymous,
            }
        }

        #[tokio::test]
        async fn append_rejects_stale_expected_seq() {
            let journal = InMemoryJournal::new();
            journal.append(event("a", 1), 0).await.unwrap();
            let err = journal.append(event("a", 2), 0).await.unwrap_err();
            assert!(err.to_string().contains("conflict"));
        }

        /// The optimistic-concurrency check is per realm id: a first append for `a` must not make
        /// the expected-seq-0 append for a distinct id `b` look like a conflict.
        #[tokio::test]
        async fn conflict_check_is_scoped_per_id_not_journal_wide() {
            let journal = InMemoryJournal::new();
            journal.append(event("a", 1), 0).await.unwrap();
            journal.append(event("b", 1), 0).await.unwrap();
            journal.append(event("a", 2), 1).await.unwrap();
        }

        #[tokio::test]
        async fn tail_returns_events_strictly_after_seq() {
            let journal = InMemoryJournal::new();
            journal.append(event("a", 1), 0).await.unwrap();
            journal.append(event("b", 1), 0).await.unwrap();
            let tail = journal.tail(1).await.unwrap();
            assert_eq!(tail.len(), 1);
            assert_eq!(tail[0].0, 2);
        }

        #[tokio::test]
        async fn events_for_filters_by_id() {
            let journal = InMemoryJournal::new();
            journal.append(event("a", 1), 0).await.unwrap();
            journal.append(event("b", 1), 0).await.unwrap();
            journal.append(event("a", 2), 1).await.unwrap();
            let events = journal.events_for(&"a".parse().unwrap()).await.unwrap();
            assert_eq!(events.len(), 2);
        }
    }
}
