//! End-to-end scenarios through the GraphMemory pipeline

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use graph_memory::storage::Mutation;
use graph_memory::{
    Attributes, CandidateEdge, Edge, EdgeFilter, EdgeId, Entity, EntityId, EntityMention, Episode,
    EpisodeFilter, EpisodeId, GraphMemory, GraphStore, HnswVectorIndex, InMemoryStore,
    Invalidation, ManualClock, MatchKind, MemoryConfig, MemoryError, ResolutionOutcome,
    ResolutionStrategy, Result, SessionContext,
};
use tempfile::TempDir;

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn memory_at(now: DateTime<Utc>, config: MemoryConfig) -> (GraphMemory, ManualClock) {
    let clock = ManualClock::new(now);
    let memory = GraphMemory::with_parts(
        Arc::new(InMemoryStore::new()),
        Arc::new(HnswVectorIndex::new()),
        Arc::new(clock.clone()),
        config,
    )
    .unwrap();
    (memory, clock)
}

async fn entity(memory: &GraphMemory, ctx: &SessionContext, name: &str, entity_type: &str) -> EntityId {
    memory
        .add_entity(ctx, EntityMention::new(name, entity_type))
        .await
        .unwrap()
        .entity
        .id
}

struct Employment {
    memory: GraphMemory,
    ctx: SessionContext,
    a: EntityId,
    b: EntityId,
}

impl Employment {
    async fn new() -> Self {
        let (memory, _) = memory_at(day(2024, 12, 1), MemoryConfig::default());
        let ctx = SessionContext::new();
        let a = entity(&memory, &ctx, "Alice", "Person").await;
        let b = entity(&memory, &ctx, "Acme", "Organization").await;
        Self { memory, ctx, a, b }
    }

    async fn works_for(&self, valid_at: DateTime<Utc>, strategy: ResolutionStrategy) -> Edge {
        self.memory
            .add_relationship(
                &self.ctx,
                CandidateEdge::new(self.a, self.b, "WORKS_FOR").valid_at(valid_at),
                Some(strategy),
            )
            .await
            .unwrap()
            .edge
    }

    fn get(&self, edge: &Edge) -> Edge {
        self.memory.edges().get(&edge.id).unwrap().unwrap()
    }

    fn valid_at(&self, t: DateTime<Utc>) -> Vec<EdgeId> {
        self.memory
            .query_valid_at(t, &EdgeFilter::all().from(self.a))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect()
    }
}

#[tokio::test]
async fn test_newest_wins_temporal_queries() {
    let s = Employment::new().await;
    let e1 = s.works_for(day(2024, 1, 1), ResolutionStrategy::NewestWins).await;
    let e2 = s.works_for(day(2024, 6, 1), ResolutionStrategy::NewestWins).await;

    let e1 = s.get(&e1);
    assert_eq!(e1.invalid_at, Some(day(2024, 6, 1)));
    assert_eq!(e1.invalidated_by, Some(e2.id));
    assert!(s.get(&e2).invalid_at.is_none());

    assert_eq!(s.valid_at(day(2024, 3, 1)), vec![e1.id]);
    assert_eq!(s.valid_at(day(2024, 7, 1)), vec![e2.id]);
    assert_eq!(
        s.memory
            .query_current(&EdgeFilter::all().involving(s.b))
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_split_timeline_keeps_both_segments() {
    let s = Employment::new().await;
    let e1 = s.works_for(day(2024, 1, 1), ResolutionStrategy::SplitTimeline).await;
    let e2 = s.works_for(day(2024, 6, 1), ResolutionStrategy::SplitTimeline).await;

    let (e1, e2) = (s.get(&e1), s.get(&e2));
    assert_eq!(e1.invalid_at, Some(e2.valid_at));
    assert!(e1.invalidated_by.is_none());
    assert!(e2.invalidated_by.is_none());

    let history = s.memory.edges().history(s.a, s.b, "WORKS_FOR").unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_merge_consolidates_into_one_open_edge() {
    let s = Employment::new().await;
    let e1 = s.works_for(day(2024, 1, 1), ResolutionStrategy::NewestWins).await;
    let merged = s.works_for(day(2024, 6, 1), ResolutionStrategy::Merge).await;

    assert_eq!(merged.valid_at, day(2024, 1, 1));
    assert!(merged.is_open());
    assert_eq!(s.get(&e1).invalidated_by, Some(merged.id));
    assert_eq!(s.valid_at(day(2024, 3, 1)).len(), 2);
    assert_eq!(s.valid_at(day(2024, 12, 2)), vec![merged.id]);
}

#[tokio::test]
async fn test_merge_at_the_same_clock_instant() {
    let s = Employment::new().await;
    let first = s
        .memory
        .add_relationship(&s.ctx, CandidateEdge::new(s.a, s.b, "WORKS_FOR"), None)
        .await
        .unwrap()
        .edge;
    let merged = s
        .memory
        .add_relationship(
            &s.ctx,
            CandidateEdge::new(s.a, s.b, "WORKS_FOR"),
            Some(ResolutionStrategy::Merge),
        )
        .await
        .unwrap()
        .edge;

    assert_eq!(merged.valid_at, day(2024, 12, 1));
    assert!(merged.is_open());
    let first = s.get(&first);
    assert_eq!(first.invalidated_by, Some(merged.id));
    assert!(first.invalid_at.unwrap() > first.valid_at);
}

#[tokio::test]
async fn test_merge_absorbs_future_dated_fact() {
    let s = Employment::new().await;
    let planned = s.works_for(day(2025, 3, 1), ResolutionStrategy::NewestWins).await;
    let merged = s.works_for(day(2024, 1, 1), ResolutionStrategy::Merge).await;

    assert_eq!(merged.valid_at, day(2024, 1, 1));
    assert_eq!(s.get(&planned).invalidated_by, Some(merged.id));
    assert_eq!(s.memory.stats().unwrap().open_edges, 1);
}

#[tokio::test]
async fn test_same_instant_correction_is_reported() {
    let s = Employment::new().await;
    let title = |t: &str| Attributes::new().with("title", t).unwrap();
    let original = s
        .memory
        .add_relationship(
            &s.ctx,
            CandidateEdge::new(s.a, s.b, "WORKS_FOR")
                .valid_at(day(2024, 1, 1))
                .attributes(title("Engineer")),
            None,
        )
        .await
        .unwrap()
        .edge;

    let restated = s
        .memory
        .add_relationship(
            &s.ctx,
            CandidateEdge::new(s.a, s.b, "WORKS_FOR")
                .valid_at(day(2024, 1, 1))
                .attributes(title("Engineer")),
            None,
        )
        .await
        .unwrap();
    assert_eq!(restated.outcome, ResolutionOutcome::Restated);
    assert_eq!(restated.edge.id, original.id);

    let err = s
        .memory
        .add_relationship(
            &s.ctx,
            CandidateEdge::new(s.a, s.b, "WORKS_FOR")
                .valid_at(day(2024, 1, 1))
                .attributes(title("Lead"))
                .confidence(0.3),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::SameInstantConflict(id) if id == original.id));

    let current = s
        .memory
        .query_current(&EdgeFilter::all().from(s.a))
        .unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(
        current[0].attributes.get("title").and_then(|v| v.as_text()),
        Some("Engineer")
    );
}

#[tokio::test]
async fn test_backdated_fact_does_not_reopen_history() {
    let s = Employment::new().await;
    let current = s.works_for(day(2024, 6, 1), ResolutionStrategy::NewestWins).await;
    let earlier = s.works_for(day(2024, 1, 1), ResolutionStrategy::NewestWins).await;

    assert_eq!(earlier.invalid_at, Some(day(2024, 6, 1)));
    assert_eq!(earlier.invalidated_by, Some(current.id));
    assert!(s.get(&current).is_open());
    assert_eq!(s.valid_at(day(2024, 3, 1)), vec![earlier.id]);
}

#[tokio::test]
async fn test_different_type_is_not_a_contradiction() {
    let s = Employment::new().await;
    s.works_for(day(2024, 1, 1), ResolutionStrategy::NewestWins).await;
    s.memory
        .add_relationship(&s.ctx, CandidateEdge::new(s.a, s.b, "INVESTED_IN"), None)
        .await
        .unwrap();
    assert_eq!(s.memory.stats().unwrap().open_edges, 2);
}

#[tokio::test]
async fn test_inverted_interval_is_rejected_and_not_persisted() {
    let s = Employment::new().await;
    let err = s
        .memory
        .add_relationship(
            &s.ctx,
            CandidateEdge::new(s.a, s.b, "WORKS_FOR")
                .valid_at(day(2024, 6, 1))
                .invalid_at(day(2024, 1, 1)),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::InvalidTemporalRange { .. }));
    assert_eq!(s.memory.stats().unwrap().edges, 0);
}

#[tokio::test]
async fn test_entity_names_are_case_insensitive() {
    let (memory, _) = memory_at(day(2024, 12, 1), MemoryConfig::default());
    let ctx = SessionContext::new();
    let ids = [
        entity(&memory, &ctx, "Python", "Language").await,
        entity(&memory, &ctx, "python", "Language").await,
        entity(&memory, &ctx, "PYTHON", "Language").await,
    ];
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(memory.stats().unwrap().entities, 1);
}

#[tokio::test]
async fn test_episode_window() {
    let (memory, clock) = memory_at(Utc.timestamp_opt(10, 0).unwrap(), MemoryConfig::default());
    let ctx = SessionContext::new();
    let episode = memory
        .start_episode(&ctx, "support call", Attributes::new())
        .await
        .unwrap();
    clock.set(Utc.timestamp_opt(20, 0).unwrap());
    memory.end_session(&ctx).await.unwrap();

    let window = |start: i64, end: i64| -> Vec<EpisodeId> {
        memory
            .query_window(
                Utc.timestamp_opt(start, 0).unwrap(),
                Utc.timestamp_opt(end, 0).unwrap(),
            )
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect()
    };
    assert_eq!(window(15, 25), vec![episode]);
    assert!(window(21, 30).is_empty());
}

#[tokio::test]
async fn test_explicit_episode_receives_writes() {
    let (memory, _) = memory_at(day(2024, 12, 1), MemoryConfig::default());
    let ctx = SessionContext::new();
    let episode = memory
        .start_episode(&ctx, "onboarding", Attributes::new())
        .await
        .unwrap();
    let alice = entity(&memory, &ctx, "Alice", "Person").await;

    let stored = memory.episodes().get(&episode).unwrap().unwrap();
    assert!(stored.linked_entity_ids.contains(&alice));
    assert_eq!(memory.episodes().list_for_session(ctx.session_id).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_keep_one_open_edge() {
    let (memory, _) = memory_at(day(2024, 12, 1), MemoryConfig::default());
    let memory = Arc::new(memory);
    let ctx = SessionContext::new();
    let a = entity(&memory, &ctx, "Alice", "Person").await;
    let b = entity(&memory, &ctx, "Acme", "Organization").await;

    let mut handles = Vec::new();
    for month in 1..=10u32 {
        let memory = memory.clone();
        handles.push(tokio::spawn(async move {
            let ctx = SessionContext::new();
            let strategy = if month % 2 == 0 {
                ResolutionStrategy::Merge
            } else {
                ResolutionStrategy::NewestWins
            };
            memory
                .add_relationship(
                    &ctx,
                    CandidateEdge::new(a, b, "WORKS_FOR").valid_at(day(2024, month, 1)),
                    Some(strategy),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let open = memory
        .edges()
        .query(&EdgeFilter::all().from(a).open_only())
        .unwrap();
    assert_eq!(open.len(), 1);
}

#[test]
fn test_rocksdb_backed_memory_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ctx = SessionContext::new();

    let (ada, e2) = runtime.block_on(async {
        let memory = GraphMemory::open(temp_dir.path(), MemoryConfig::default()).unwrap();
        let ada = memory
            .add_entity(
                &ctx,
                EntityMention::builder("Ada Lovelace")
                    .entity_type("Person")
                    .embedding(vec![1.0, 0.0, 0.0])
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap()
            .entity;
        let engine = entity(&memory, &ctx, "Analytical Engine", "Machine").await;

        for month in [1, 6] {
            memory
                .add_relationship(
                    &ctx,
                    CandidateEdge::new(ada.id, engine, "DESIGNED_FOR").valid_at(day(2024, month, 1)),
                    None,
                )
                .await
                .unwrap();
        }
        let current = memory
            .query_current(&EdgeFilter::all().from(ada.id))
            .unwrap();
        (ada, current[0].clone())
    });

    let memory = GraphMemory::open(temp_dir.path(), MemoryConfig::default()).unwrap();
    let before = memory
        .query_valid_at(day(2024, 3, 1), &EdgeFilter::all().from(ada.id))
        .unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].invalidated_by, Some(e2.id));
    assert_eq!(memory.stats().unwrap().episodes, 1);

    // embeddings were reindexed on open
    let alias = runtime
        .block_on(memory.add_entity(
            &ctx,
            EntityMention::builder("Countess of Lovelace")
                .entity_type("Person")
                .embedding(vec![0.99, 0.05, 0.0])
                .build()
                .unwrap(),
        ))
        .unwrap();
    assert_eq!(alias.entity.id, ada.id);
    assert!(matches!(alias.match_kind, MatchKind::Similar { .. }));
}

/// Store whose compare-and-set always loses to a phantom writer
struct ContestedStore {
    inner: InMemoryStore,
}

impl GraphStore for ContestedStore {
    fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.inner.get_entity(id)
    }

    fn put_entity(&self, entity: &Entity) -> Result<()> {
        self.inner.put_entity(entity)
    }

    fn update_entity(&self, id: &EntityId, mutation: Mutation<'_, Entity>) -> Result<Option<Entity>> {
        self.inner.update_entity(id, mutation)
    }

    fn find_entities_by_name(&self, normalized_name: &str) -> Result<Vec<Entity>> {
        self.inner.find_entities_by_name(normalized_name)
    }

    fn list_entities(&self) -> Result<Vec<Entity>> {
        self.inner.list_entities()
    }

    fn count_entities(&self) -> Result<usize> {
        self.inner.count_entities()
    }

    fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        self.inner.get_edge(id)
    }

    fn insert_edge_if_absent(&self, edge: &Edge) -> Result<bool> {
        self.inner.insert_edge_if_absent(edge)
    }

    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        self.inner.query_edges(filter)
    }

    fn invalidate_edge_if_open(
        &self,
        id: &EdgeId,
        invalid_at: DateTime<Utc>,
        _invalidated_by: Option<EdgeId>,
    ) -> Result<Invalidation> {
        match self.inner.get_edge(id)? {
            Some(mut edge) => {
                edge.invalid_at = Some(invalid_at);
                edge.invalidated_by = Some(EdgeId::new());
                Ok(Invalidation::AlreadyInvalidated(edge))
            }
            None => Ok(Invalidation::NotFound(*id)),
        }
    }

    fn get_episode(&self, id: &EpisodeId) -> Result<Option<Episode>> {
        self.inner.get_episode(id)
    }

    fn put_episode(&self, episode: &Episode) -> Result<()> {
        self.inner.put_episode(episode)
    }

    fn update_episode(
        &self,
        id: &EpisodeId,
        mutation: Mutation<'_, Episode>,
    ) -> Result<Option<Episode>> {
        self.inner.update_episode(id, mutation)
    }

    fn query_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        self.inner.query_episodes(filter)
    }
}

#[tokio::test]
async fn test_persistent_contention_gives_up() {
    let memory = GraphMemory::with_parts(
        Arc::new(ContestedStore {
            inner: InMemoryStore::new(),
        }),
        Arc::new(HnswVectorIndex::new()),
        Arc::new(ManualClock::new(day(2024, 12, 1))),
        MemoryConfig::default().with_max_resolution_attempts(2),
    )
    .unwrap();
    let ctx = SessionContext::new();
    let a = entity(&memory, &ctx, "Alice", "Person").await;
    let b = entity(&memory, &ctx, "Acme", "Organization").await;

    memory
        .add_relationship(
            &ctx,
            CandidateEdge::new(a, b, "WORKS_FOR").valid_at(day(2024, 1, 1)),
            None,
        )
        .await
        .unwrap();
    let err = memory
        .add_relationship(
            &ctx,
            CandidateEdge::new(a, b, "WORKS_FOR").valid_at(day(2024, 6, 1)),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::ConcurrentModification { attempts: 2 }));
    assert_eq!(memory.stats().unwrap().edges, 1);
}
