//! C4 — the per-realm single-writer aggregate runtime.
//!
//! Each [`Label`] is its own serialized actor: a shard table maps it to a lazily-created mutex
//! guarding the replayed [`RealmState`], so commands against distinct realms never contend with
//! each other while commands against the same realm are strictly ordered. Grounded in the
//! teacher's `session.rs` (per-session message routing keyed by id) and `TokenCache`
//! (`Mutex`/`HashMap` sharding), generalized from mpsc-routed messages to a `DashMap` of
//! `tokio::sync::Mutex`-guarded entities since C4 needs direct `&mut` access rather than a
//! message protocol.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use super::errors::RealmRejection;
use super::journal::{EventJournal, SnapshotStore};
use super::model::{Command, Label, RealmState};
use super::state::{evaluate, next};
use iam_task::{ShutdownSignal, Task};

/// Commands are evaluated within this bound; a stuck journal append surfaces as a timeout rather
/// than stalling the shard indefinitely (§5's latency budget on the write path).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot after this many events replayed since the last snapshot, bounding recovery replay.
const SNAPSHOT_EVERY: u64 = 50;

/// An entry in the shard table: the replayed state. The realm's own `rev` doubles as the
/// per-id journal sequence number passed to `EventJournal::append` — every accepted command
/// appends exactly one event and advances `rev` by one, so they stay in lockstep by construction.
struct Entity {
    state: RealmState,
    events_since_snapshot: u64,
}

/// Owns the per-label shard table and drives commands against the journal + snapshot store.
pub struct RealmAggregate {
    shards: dashmap::DashMap<Label, Arc<AsyncMutex<Entity>>>,
    journal: Arc<dyn EventJournal>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl RealmAggregate {
    pub fn new(journal: Arc<dyn EventJournal>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            shards: dashmap::DashMap::new(),
            journal,
            snapshots,
        }
    }

    fn shard(&self, id: &Label) -> Arc<AsyncMutex<Entity>> {
        self.shards
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(Entity {
                    state: RealmState::Initial,
                    events_since_snapshot: 0,
                }))
            })
            .clone()
    }

    /// Replays `id`'s state from its latest snapshot (if any) plus any events appended since.
    async fn recover(&self, id: &Label, entity: &mut Entity) -> anyhow::Result<()> {
        if entity.state.rev() == 0 {
            if let Some((rev, state)) = self.snapshots.load_latest(id).await? {
                if state.rev() == rev {
                    entity.state = state;
                }
            }
        }
        let since = self.journal.events_for(id).await?;
        let already_applied = entity.state.rev();
        for event in since {
            if event.rev() > already_applied {
                entity.state = next(&entity.state, &event);
            }
        }
        Ok(())
    }

    /// Evaluates `command` against `id`'s current (replayed) state, appends the resulting event,
    /// and returns the new state. Bounded by [`COMMAND_TIMEOUT`].
    #[instrument(skip(self, command), fields(realm = %id))]
    pub async fn dispatch(&self, id: &Label, command: Command) -> anyhow::Result<Result<RealmState, RealmRejection>> {
        let shard = self.shard(id);
        tokio::time::timeout(COMMAND_TIMEOUT, async {
            let mut entity = shard.lock().await;
            self.recover(id, &mut entity).await?;

            match evaluate(&entity.state, command, OffsetDateTime::now_utc()) {
                Ok(event) => {
                    let expected_seq = entity.state.rev();
                    self.journal.append(event.clone(), expected_seq).await?;
                    entity.state = next(&entity.state, &event);
                    entity.events_since_snapshot += 1;
                    if entity.events_since_snapshot >= SNAPSHOT_EVERY {
                        self.snapshots.save(id, entity.state.rev(), &entity.state).await?;
                        entity.events_since_snapshot = 0;
                    }
                    Ok(Ok(entity.state.clone()))
                }
                Err(rejection) => Ok(Err(rejection)),
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("command against realm `{id}` timed out"))?
    }

    /// The current replayed state for `id`, for read paths that bypass the index (C5).
    pub async fn current(&self, id: &Label) -> anyhow::Result<RealmState> {
        let shard = self.shard(id);
        let mut entity = shard.lock().await;
        self.recover(id, &mut entity).await?;
        Ok(entity.state.clone())
    }

    /// Replays `id`'s full event history and folds it only up to (and including) `rev`, giving
    /// the `GET /realms/{id}?rev=` read path (§6) the state as of that revision.
    pub async fn at_revision(&self, id: &Label, rev: u64) -> anyhow::Result<RealmState> {
        let events = self.journal.events_for(id).await?;
        let mut state = RealmState::Initial;
        for event in events {
            if event.rev() > rev {
                break;
            }
            state = next(&state, &event);
        }
        Ok(state)
    }

    /// Drops shards with no pending lock contention, bounding the table's memory footprint.
    fn passivate_idle(&self) {
        self.shards.retain(|_, entity| Arc::strong_count(entity) > 1 || entity.try_lock().is_err());
    }
}

/// Periodically sweeps idle shards out of the aggregate's shard table (§5: bounded memory, not a
/// correctness requirement — a passivated shard simply replays from the journal on next use).
pub struct PassivationSweep {
    pub aggregate: Arc<RealmAggregate>,
    pub interval: Duration,
}

#[async_trait::async_trait]
impl Task for PassivationSweep {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "realm-aggregate-passivation";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.aggregate.passivate_idle();
                }
                () = shutdown_signal.wait() => {
                    warn!("passivation sweep shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::journal::memory::{InMemoryJournal, InMemorySnapshotStore};
    use crate::realm::model::{GrantType, RealmEndpoints, RealmFields, SubjectId};
    use std::collections::BTreeSet;

    fn fields() -> RealmFields {
        RealmFields {
            name: "Example".to_owned(),
            open_id_config: "https://example.com/.well-known/openid-configuration".parse().unwrap(),
            issuer: "https://example.com".to_owned(),
            keys: vec![],
            grant_types: BTreeSet::from([GrantType::AuthorizationCode]),
            logo: None,
            endpoints: RealmEndpoints {
                authorization_endpoint: "https://example.com/auth".parse().unwrap(),
                token_endpoint: "https://example.com/token".parse().unwrap(),
                user_info_endpoint: "https://example.com/userinfo".parse().unwrap(),
                revocation_endpoint: None,
                end_session_endpoint: None,
            },
        }
    }

    fn aggregate() -> RealmAggregate {
        RealmAggregate::new(Arc::new(InMemoryJournal::new()), Arc::new(InMemorySnapshotStore::new()))
    }

    #[tokio::test]
    async fn create_then_update_round_trips_through_the_journal() {
        let aggregate = aggregate();
        let id: Label = "acme".parse().unwrap();

        let created = aggregate
            .dispatch(
                &id,
                Command::Create {
                    id: id.clone(),
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.rev(), 1);

        let updated = aggregate
            .dispatch(
                &id,
                Command::Update {
                    id: id.clone(),
                    prior_rev: 1,
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.rev(), 2);
    }

    #[tokio::test]
    async fn stale_rev_is_rejected_without_advancing_state() {
        let aggregate = aggregate();
        let id: Label = "acme".parse().unwrap();
        aggregate
            .dispatch(
                &id,
                Command::Create {
                    id: id.clone(),
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();

        let rejection = aggregate
            .dispatch(
                &id,
                Command::Update {
                    id: id.clone(),
                    prior_rev: 99,
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(rejection, RealmRejection::IncorrectRev { .. }));

        let current = aggregate.current(&id).await.unwrap();
        assert_eq!(current.rev(), 1);
    }

    #[tokio::test]
    async fn creating_a_second_distinct_realm_does_not_conflict_with_the_first() {
        let aggregate = aggregate();
        let acme: Label = "acme".parse().unwrap();
        let globex: Label = "globex".parse().unwrap();

        let created_acme = aggregate
            .dispatch(
                &acme,
                Command::Create {
                    id: acme.clone(),
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created_acme.rev(), 1);

        let created_globex = aggregate
            .dispatch(
                &globex,
                Command::Create {
                    id: globex.clone(),
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created_globex.rev(), 1);

        let updated_acme = aggregate
            .dispatch(
                &acme,
                Command::Update {
                    id: acme.clone(),
                    prior_rev: 1,
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated_acme.rev(), 2);
    }

    #[tokio::test]
    async fn recovers_state_from_journal_after_shard_eviction() {
        let aggregate = aggregate();
        let id: Label = "acme".parse().unwrap();
        aggregate
            .dispatch(
                &id,
                Command::Create {
                    id: id.clone(),
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();

        aggregate.shards.clear();

        let recovered = aggregate.current(&id).await.unwrap();
        assert_eq!(recovered.rev(), 1);
    }

    #[tokio::test]
    async fn at_revision_returns_the_historical_state() {
        let aggregate = aggregate();
        let id: Label = "acme".parse().unwrap();
        aggregate
            .dispatch(
                &id,
                Command::Create {
                    id: id.clone(),
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        aggregate
            .dispatch(
                &id,
                Command::Update {
                    id: id.clone(),
                    prior_rev: 1,
                    subject: SubjectId::Anonymous,
                    fields: fields(),
                },
            )
            .await
            .unwrap()
            .unwrap();

        let at_rev_1 = aggregate.at_revision(&id, 1).await.unwrap();
        assert_eq!(at_rev_1.rev(), 1);
        let at_rev_2 = aggregate.at_revision(&id, 2).await.unwrap();
        assert_eq!(at_rev_2.rev(), 2);
    }
}
