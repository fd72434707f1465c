//! Orchestrator: the public API over the tier hierarchy
//!
//! Routes writes to the right tiers, fans reads out concurrently across the
//! tier scans and the keyword/vector/graph paths, fuses the candidate
//! lists, enforces the token budget, and applies promotion side effects.
//!
//! Read-path failures never unwind: each source resolves to a per-source
//! status, failed sources are logged once and counted, and the response is
//! flagged degraded. Only whole-request deadline expiry surfaces as an
//! error.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::clock::{SharedClock, SystemClock};
use crate::collaborators::{
    EmbeddingProvider, GraphBackend, GraphStore, HashEmbedder, VectorBackend, VectorStore,
};
use crate::config::StratumConfig;
use crate::error::{Result, StratumError};
use crate::fusion::{fuse, CandidateList, Channel, FusedCandidate};
use crate::keyword::KeywordIndex;
use crate::response_cache::ResponseCache;
use crate::storage::{RecordStore, RecordStoreConfig};
use crate::tiers::{ImmediateTier, LongTermTier, SessionTier};
use crate::types::{
    meta_keys, estimate_tokens, validate_metadata, Chunk, ClearScope, ComponentScores,
    ContextItem, ItemFilter, ItemKind, Priority, RetrievalStrategy, RetrieveRequest,
    RetrieveResponse, ScoredItem, SourceTier, StatsSnapshot, StoreOutcome, StoreRequest,
    TierCounts, TierHint,
};

const WRITE_STRIPES: usize = 16;

/// Process-wide operation counters
#[derive(Debug, Default)]
struct Counters {
    stores: AtomicU64,
    retrievals: AtomicU64,
    degraded_responses: AtomicU64,
    source_failures: AtomicU64,
    promotions_to_session: AtomicU64,
    promotions_to_long_term: AtomicU64,
}

/// Which fan-out source produced a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceId {
    Immediate,
    Session,
    Keyword,
    Vector,
    Graph,
}

/// Payload of one completed fan-out source
enum SourceData {
    /// Tier scans carry full items
    Items(SourceId, Vec<(ContextItem, f32)>),
    /// Index/collaborator paths carry scored ids
    Ids(SourceId, Vec<(String, f32)>),
}

enum SourceOutcome {
    Done(SourceData),
    Failed(SourceId),
    TimedOut(SourceId),
}

/// Aborts outstanding fan-out tasks when the join completes or the request
/// future is dropped; aborting a finished task is a no-op
struct AbortGuard {
    handles: Vec<tokio::task::AbortHandle>,
}

impl AbortGuard {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Multi-tier context cache orchestrator
pub struct Orchestrator {
    config: StratumConfig,
    clock: SharedClock,
    immediate: Arc<ImmediateTier>,
    session: Arc<SessionTier>,
    long_term: Arc<LongTermTier>,
    keyword: Arc<RwLock<KeywordIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    response_cache: Arc<ResponseCache>,
    counters: Arc<Counters>,
    write_stripes: Vec<tokio::sync::Mutex<()>>,
}

impl Orchestrator {
    /// In-memory backends, wall clock, ephemeral record store
    pub fn new(config: StratumConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(SystemClock),
            VectorBackend::InMemory.build(),
            GraphBackend::InMemory.build(),
            Arc::new(HashEmbedder::default()),
            RecordStoreConfig::default(),
        )
    }

    /// Injectable clock for deterministic tests
    pub fn with_clock(config: StratumConfig, clock: SharedClock) -> Result<Self> {
        Self::with_parts(
            config,
            clock,
            VectorBackend::InMemory.build(),
            GraphBackend::InMemory.build(),
            Arc::new(HashEmbedder::default()),
            RecordStoreConfig::default(),
        )
    }

    /// Fully injected construction
    pub fn with_parts(
        config: StratumConfig,
        clock: SharedClock,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        record_config: RecordStoreConfig,
    ) -> Result<Self> {
        let keyword = Arc::new(RwLock::new(KeywordIndex::new(config.keyword.clone())));
        let immediate = Arc::new(ImmediateTier::new(config.immediate.clone(), clock.clone()));
        let session = Arc::new(SessionTier::new(config.session.clone(), clock.clone()));
        let long_term = Arc::new(LongTermTier::new(
            RecordStore::open(&record_config)?,
            Chunker::new(config.chunker.clone()),
            keyword.clone(),
            vectors.clone(),
            graph.clone(),
            embedder.clone(),
        ));
        let response_cache = Arc::new(ResponseCache::new(config.cache.clone(), clock.clone()));

        Ok(Self {
            config,
            clock,
            immediate,
            session,
            long_term,
            keyword,
            embedder,
            vectors,
            graph,
            response_cache,
            counters: Arc::new(Counters::default()),
            write_stripes: (0..WRITE_STRIPES)
                .map(|_| tokio::sync::Mutex::new(()))
                .collect(),
        })
    }

    pub fn immediate_tier(&self) -> &ImmediateTier {
        &self.immediate
    }

    pub fn session_tier(&self) -> &SessionTier {
        &self.session
    }

    pub fn long_term_tier(&self) -> &LongTermTier {
        &self.long_term
    }

    /// Handle to the graph collaborator, for entity/edge population
    pub fn graph_store(&self) -> Arc<dyn GraphStore> {
        self.graph.clone()
    }

    fn stripe_for(&self, id: &str) -> &tokio::sync::Mutex<()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        &self.write_stripes[(hasher.finish() as usize) % WRITE_STRIPES]
    }

    // ------------------------------------------------------------------
    // store
    // ------------------------------------------------------------------

    /// Validate, build, and route a new item to its tiers
    pub async fn store(&self, request: StoreRequest) -> Result<StoreOutcome> {
        if request.content.trim().is_empty() {
            return Err(StratumError::InvalidInput(
                "content must not be empty".to_string(),
            ));
        }
        validate_metadata(&request.metadata).map_err(StratumError::InvalidInput)?;

        let item = self.build_item(&request)?;
        let id = item.id.clone();
        let hint = request.tier_hint.unwrap_or(TierHint::Auto);
        let conversation = item.conversation_id().map(String::from);

        let _guard = self.stripe_for(&id).lock().await;

        let mut admitted = Vec::new();
        match hint {
            TierHint::Immediate => {
                self.immediate.add(item);
                admitted.push(SourceTier::Immediate);
            }
            TierHint::Session => {
                let conv = conversation.ok_or_else(|| {
                    StratumError::InvalidInput(
                        "session tier hint requires a conversation_id".to_string(),
                    )
                })?;
                self.session.add(item, &conv);
                admitted.push(SourceTier::Session);
            }
            TierHint::LongTerm => {
                self.long_term.add(&item).await?;
                admitted.push(SourceTier::LongTerm);
            }
            TierHint::Auto => {
                let wants_long_term = item.priority >= Priority::High
                    || matches!(item.kind, ItemKind::Preference | ItemKind::Fact);

                self.immediate.add(item.clone());
                admitted.push(SourceTier::Immediate);

                if let Some(ref conv) = conversation {
                    self.session.add(item.clone(), conv);
                    admitted.push(SourceTier::Session);
                }

                if wants_long_term {
                    self.long_term.add(&item).await?;
                    admitted.push(SourceTier::LongTerm);
                }
            }
        }

        self.response_cache.invalidate_all();
        self.counters.stores.fetch_add(1, Ordering::Relaxed);
        debug!(id = %id, tiers = admitted.len(), "stored item");

        Ok(StoreOutcome { id, admitted })
    }

    /// Construct the item from the request: kind and priority derive from
    /// the reserved metadata keys, token estimate is fixed at ingest
    fn build_item(&self, request: &StoreRequest) -> Result<ContextItem> {
        let mut metadata = request.metadata.clone();

        if let Some(ref conv) = request.conversation_id {
            metadata.insert(
                meta_keys::CONVERSATION_ID.to_string(),
                serde_json::Value::String(conv.clone()),
            );
        }

        let kind = match metadata.get(meta_keys::TYPE).and_then(|v| v.as_str()) {
            Some(raw) => raw.parse::<ItemKind>().map_err(StratumError::InvalidInput)?,
            None => ItemKind::default(),
        };

        let priority = match metadata.get(meta_keys::IMPORTANCE) {
            Some(serde_json::Value::String(raw)) => {
                raw.parse::<Priority>().map_err(StratumError::InvalidInput)?
            }
            Some(value) if value.is_number() => {
                Priority::from_weight(value.as_f64().unwrap_or(1.0) as f32)
            }
            Some(_) => {
                return Err(StratumError::InvalidInput(
                    "importance must be a priority name or number".to_string(),
                ))
            }
            None => Priority::default(),
        };

        let now = self.clock.now();
        Ok(ContextItem {
            id: Uuid::new_v4().to_string(),
            content: request.content.clone(),
            kind,
            priority,
            metadata,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            token_estimate: estimate_tokens(&request.content),
            tier_hint: request.tier_hint,
        })
    }

    // ------------------------------------------------------------------
    // retrieve
    // ------------------------------------------------------------------

    /// Answer a retrieval request: cache check, concurrent fan-out, fusion,
    /// token budget, promotion side effects
    pub async fn retrieve(&self, request: RetrieveRequest) -> Result<RetrieveResponse> {
        self.counters.retrievals.fetch_add(1, Ordering::Relaxed);

        if request.query.trim().is_empty() || request.max_results == 0 {
            return Ok(RetrieveResponse::default());
        }

        let mut request = request;
        if request.strategy == RetrievalStrategy::Auto {
            request.strategy = resolve_strategy(&request.query);
        }

        if let Some(cached) = self.response_cache.get(&request) {
            return Ok(cached);
        }

        let deadline = Duration::from_millis(self.config.retrieve.deadline_ms);
        let outcomes = self.fan_out(&request, deadline).await;

        let mut immediate_hits: Vec<(ContextItem, f32)> = Vec::new();
        let mut session_hits: Vec<(ContextItem, f32)> = Vec::new();
        let mut keyword_ids: Option<Vec<(String, f32)>> = None;
        let mut semantic_ids: Option<Vec<(String, f32)>> = None;
        let mut graph_ids: Option<Vec<(String, f32)>> = None;

        let launched = outcomes.len();
        let mut failures = 0usize;
        let mut timeouts = 0usize;

        for outcome in outcomes {
            match outcome {
                SourceOutcome::Done(SourceData::Items(SourceId::Immediate, items)) => {
                    immediate_hits = items;
                }
                SourceOutcome::Done(SourceData::Items(SourceId::Session, items)) => {
                    session_hits = items;
                }
                SourceOutcome::Done(SourceData::Ids(SourceId::Keyword, ids)) => {
                    keyword_ids = Some(ids);
                }
                SourceOutcome::Done(SourceData::Ids(SourceId::Vector, ids)) => {
                    semantic_ids = Some(ids);
                }
                SourceOutcome::Done(SourceData::Ids(SourceId::Graph, ids)) => {
                    graph_ids = Some(ids);
                }
                SourceOutcome::Done(_) => {}
                SourceOutcome::Failed(source) => {
                    warn!(?source, "retrieval source failed");
                    failures += 1;
                }
                SourceOutcome::TimedOut(source) => {
                    warn!(?source, "retrieval source timed out");
                    timeouts += 1;
                }
            }
        }

        if launched > 0 && timeouts == launched {
            return Err(StratumError::DeadlineExceeded);
        }

        let degraded = failures + timeouts > 0;
        if degraded {
            self.counters
                .source_failures
                .fetch_add((failures + timeouts) as u64, Ordering::Relaxed);
        }

        let response = if request.strategy == RetrievalStrategy::Recency {
            self.assemble_recency(&request, immediate_hits, session_hits, degraded)
        } else {
            self.assemble_fused(
                &request,
                immediate_hits,
                session_hits,
                keyword_ids,
                semantic_ids,
                graph_ids,
                degraded,
            )?
        };

        self.apply_promotions(&response).await;

        if degraded {
            self.counters
                .degraded_responses
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.response_cache.put(&request, &response);
        }

        Ok(response)
    }

    /// Spawn one task per eligible source, each bounded by the remaining
    /// deadline, and join them all
    async fn fan_out(&self, request: &RetrieveRequest, deadline: Duration) -> Vec<SourceOutcome> {
        let strategy = request.strategy;
        let scan_filter = ItemFilter {
            kinds: request.kinds.clone(),
            conversation_id: None,
            since: request.since,
            until: request.until,
        };
        let headroom = request.max_results.saturating_mul(2).max(1);

        let mut guard = AbortGuard::new();
        let mut tasks: Vec<(SourceId, JoinHandle<Result<SourceData>>)> = Vec::new();

        if strategy != RetrievalStrategy::Semantic {
            let immediate = self.immediate.clone();
            let query = request.query.clone();
            let filter = scan_filter.clone();
            tasks.push((
                SourceId::Immediate,
                tokio::spawn(async move {
                    Ok(SourceData::Items(
                        SourceId::Immediate,
                        immediate.search(&query, Some(&filter)),
                    ))
                }),
            ));

            let session = self.session.clone();
            let query = request.query.clone();
            let filter = scan_filter.clone();
            let conversation = request.conversation_id.clone();
            tasks.push((
                SourceId::Session,
                tokio::spawn(async move {
                    Ok(SourceData::Items(
                        SourceId::Session,
                        session.search(&query, conversation.as_deref(), Some(&filter)),
                    ))
                }),
            ));
        }

        if matches!(
            strategy,
            RetrievalStrategy::Keyword | RetrievalStrategy::Hybrid | RetrievalStrategy::Relevance
        ) {
            let keyword = self.keyword.clone();
            let query = request.query.clone();
            tasks.push((
                SourceId::Keyword,
                tokio::spawn(async move {
                    let hits = keyword.read().search(&query, headroom, None);
                    let parents = hits
                        .into_iter()
                        .map(|(doc_id, score)| (Chunk::parent_of(&doc_id).to_string(), score))
                        .collect();
                    Ok(SourceData::Ids(SourceId::Keyword, parents))
                }),
            ));
        }

        if matches!(
            strategy,
            RetrievalStrategy::Semantic | RetrievalStrategy::Hybrid
        ) {
            let embedder = self.embedder.clone();
            let vectors = self.vectors.clone();
            let query = request.query.clone();
            tasks.push((
                SourceId::Vector,
                tokio::spawn(async move {
                    let embedded = embedder.embed(&[query]).await?;
                    let vector = embedded.into_iter().next().ok_or_else(|| {
                        StratumError::Collaborator("embedder returned no vector".to_string())
                    })?;
                    let hits = vectors.search(&vector, headroom, None).await?;
                    let parents = hits
                        .into_iter()
                        .map(|(doc_id, score)| (Chunk::parent_of(&doc_id).to_string(), score))
                        .collect();
                    Ok(SourceData::Ids(SourceId::Vector, parents))
                }),
            ));
        }

        if matches!(strategy, RetrievalStrategy::Graph | RetrievalStrategy::Hybrid) {
            let graph = self.graph.clone();
            let query = request.query.clone();
            tasks.push((
                SourceId::Graph,
                tokio::spawn(async move {
                    let hits = graph.search(&query, 2).await?;
                    Ok(SourceData::Ids(SourceId::Graph, hits))
                }),
            ));
        }

        for (_, handle) in &tasks {
            guard.handles.push(handle.abort_handle());
        }

        let joined = join_all(tasks.into_iter().map(|(source, handle)| async move {
            match timeout(deadline, handle).await {
                Ok(Ok(Ok(data))) => SourceOutcome::Done(data),
                Ok(Ok(Err(_))) | Ok(Err(_)) => SourceOutcome::Failed(source),
                Err(_) => SourceOutcome::TimedOut(source),
            }
        }))
        .await;

        drop(guard);
        joined
    }

    /// Recency strategy bypasses fusion: tier scans alone, newest access
    /// first
    fn assemble_recency(
        &self,
        request: &RetrieveRequest,
        immediate_hits: Vec<(ContextItem, f32)>,
        session_hits: Vec<(ContextItem, f32)>,
        degraded: bool,
    ) -> RetrieveResponse {
        let now = self.clock.now();
        let half_life = self.config.session.half_life_seconds as f32;

        let mut by_id: HashMap<String, (ContextItem, SourceTier)> = HashMap::new();
        for (item, _) in session_hits {
            by_id.insert(item.id.clone(), (item, SourceTier::Session));
        }
        for (item, _) in immediate_hits {
            by_id.insert(item.id.clone(), (item, SourceTier::Immediate));
        }

        let mut entries: Vec<(ContextItem, SourceTier)> = by_id.into_values().collect();
        entries.sort_by(|a, b| {
            b.0.last_accessed_at
                .cmp(&a.0.last_accessed_at)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        let scored: Vec<ScoredItem> = entries
            .into_iter()
            .map(|(item, tier)| {
                let idle = (now - item.last_accessed_at).num_seconds().max(0) as f32;
                let recency = (-idle / half_life).exp();
                ScoredItem {
                    item,
                    score: recency,
                    source_tier: tier,
                    component_scores: ComponentScores {
                        recency: Some(recency),
                        ..Default::default()
                    },
                }
            })
            .collect();

        self.finalize(request, scored, degraded)
    }

    /// Relevance-bearing strategies run through hybrid fusion
    #[allow(clippy::too_many_arguments)]
    fn assemble_fused(
        &self,
        request: &RetrieveRequest,
        immediate_hits: Vec<(ContextItem, f32)>,
        session_hits: Vec<(ContextItem, f32)>,
        keyword_ids: Option<Vec<(String, f32)>>,
        semantic_ids: Option<Vec<(String, f32)>>,
        graph_ids: Option<Vec<(String, f32)>>,
        degraded: bool,
    ) -> Result<RetrieveResponse> {
        let weights = &self.config.fusion;

        let mut by_id: HashMap<String, (ContextItem, SourceTier)> = HashMap::new();
        for (item, _) in &session_hits {
            by_id.insert(item.id.clone(), (item.clone(), SourceTier::Session));
        }
        for (item, _) in &immediate_hits {
            by_id.insert(item.id.clone(), (item.clone(), SourceTier::Immediate));
        }

        let mut lists = Vec::new();
        if let Some(entries) = keyword_ids {
            lists.push(CandidateList::new(Channel::Keyword, weights.keyword_weight, entries));
        }
        if let Some(entries) = semantic_ids {
            lists.push(CandidateList::new(
                Channel::Semantic,
                weights.semantic_weight,
                entries,
            ));
        }
        if let Some(entries) = graph_ids {
            lists.push(CandidateList::new(Channel::Graph, weights.graph_weight, entries));
        }
        if !immediate_hits.is_empty() {
            lists.push(CandidateList::new(
                Channel::Immediate,
                weights.keyword_weight / 2.0,
                immediate_hits
                    .iter()
                    .map(|(item, score)| (item.id.clone(), *score))
                    .collect(),
            ));
        }
        if !session_hits.is_empty() {
            lists.push(CandidateList::new(
                Channel::Session,
                weights.keyword_weight / 2.0,
                session_hits
                    .iter()
                    .map(|(item, score)| (item.id.clone(), *score))
                    .collect(),
            ));
        }

        let fused = fuse(&lists, request.min_score, request.max_results);

        let filter = ItemFilter {
            kinds: request.kinds.clone(),
            conversation_id: None,
            since: request.since,
            until: request.until,
        };

        let mut scored = Vec::new();
        for FusedCandidate {
            id,
            score,
            components,
            ..
        } in fused
        {
            let resolved = match by_id.get(&id) {
                Some((item, tier)) => Some((item.clone(), *tier)),
                None => self
                    .long_term
                    .get(&id)?
                    .map(|item| (item, SourceTier::LongTerm)),
            };
            let Some((item, tier)) = resolved else {
                continue;
            };
            if !filter.matches(&item) {
                continue;
            }
            scored.push(ScoredItem {
                item,
                score,
                source_tier: tier,
                component_scores: components,
            });
        }

        Ok(self.finalize(request, scored, degraded))
    }

    /// Truncate to `max_results`, then walk the token budget
    fn finalize(
        &self,
        request: &RetrieveRequest,
        mut scored: Vec<ScoredItem>,
        degraded: bool,
    ) -> RetrieveResponse {
        let total_retrieved = scored.len();
        scored.truncate(request.max_results);

        let budget = request
            .max_tokens
            .unwrap_or(self.config.retrieve.max_tokens) as u64;

        let mut kept = Vec::new();
        let mut used = 0u64;
        for entry in scored {
            let cost = entry.item.token_estimate as u64;
            if !kept.is_empty() && used + cost > budget {
                break;
            }
            used += cost;
            kept.push(entry);
            // the first item is always kept, even past the budget
        }

        let mut tier_counts = TierCounts::default();
        for entry in &kept {
            tier_counts.record(entry.source_tier);
        }

        RetrieveResponse {
            results: kept,
            total_retrieved,
            cache_hit: false,
            degraded,
            tier_counts,
        }
    }

    /// Touch returned items and promote across tiers on threshold crossings.
    /// Promotion is copy-on-promote; failures degrade silently.
    async fn apply_promotions(&self, response: &RetrieveResponse) {
        let now = self.clock.now();

        for entry in &response.results {
            match entry.source_tier {
                SourceTier::Immediate => {
                    let Some(updated) = self.immediate.touch(&entry.item.id) else {
                        continue;
                    };
                    if updated.access_count < self.config.promotion.immediate_to_session_access {
                        continue;
                    }
                    let Some(conv) = updated.conversation_id().map(String::from) else {
                        continue;
                    };
                    if self.session.get(&updated.id).is_none() {
                        self.session.add(updated.clone(), &conv);
                        self.counters
                            .promotions_to_session
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(id = %updated.id, "promoted immediate -> session");
                    }
                }
                SourceTier::Session => {
                    let Some(conv) = entry.item.conversation_id().map(String::from) else {
                        continue;
                    };
                    let Some(updated) = self.session.touch(&conv, &entry.item.id) else {
                        continue;
                    };
                    let eligible = updated.priority >= Priority::High
                        && updated.access_count >= self.config.promotion.session_to_longterm_access;
                    if !eligible || self.long_term.contains(&updated.id) {
                        continue;
                    }
                    match self.long_term.add(&updated).await {
                        Ok(()) => {
                            self.counters
                                .promotions_to_long_term
                                .fetch_add(1, Ordering::Relaxed);
                            debug!(id = %updated.id, "promoted session -> long-term");
                        }
                        Err(e) => warn!(id = %updated.id, error = %e, "promotion failed"),
                    }
                }
                SourceTier::LongTerm => {
                    self.long_term
                        .touch(&entry.item.id, entry.item.access_count + 1, now);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // delete / clear / stats
    // ------------------------------------------------------------------

    /// Remove an item from every tier holding it
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.stripe_for(id).lock().await;

        let in_immediate = self.immediate.delete(id);
        let in_session = self.session.delete(id);
        let in_long_term = self.long_term.delete(id).await?;

        self.response_cache.invalidate_all();
        Ok(in_immediate || in_session || in_long_term)
    }

    /// Clear a scope; long-term items persist until explicitly deleted
    pub fn clear(&self, scope: ClearScope) -> usize {
        let cleared = match scope {
            ClearScope::Immediate => self.immediate.clear(),
            ClearScope::Session(conversation) => self.session.clear(conversation.as_deref()),
            ClearScope::All => self.immediate.clear() + self.session.clear(None),
        };
        self.response_cache.invalidate_all();
        cleared
    }

    /// Point-in-time metrics snapshot
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            immediate_items: self.immediate.len(),
            immediate_tokens: self.immediate.token_sum(),
            session_conversations: self.session.conversation_count(),
            session_items: self.session.total_items(),
            long_term_items: self.long_term.count(),
            stores: self.counters.stores.load(Ordering::Relaxed),
            retrievals: self.counters.retrievals.load(Ordering::Relaxed),
            cache_hits: self.response_cache.hits(),
            cache_misses: self.response_cache.misses(),
            cache_entries: self.response_cache.len(),
            degraded_responses: self.counters.degraded_responses.load(Ordering::Relaxed),
            source_failures: self.counters.source_failures.load(Ordering::Relaxed),
            promotions_to_session: self.counters.promotions_to_session.load(Ordering::Relaxed),
            promotions_to_long_term: self
                .counters
                .promotions_to_long_term
                .load(Ordering::Relaxed),
        }
    }
}

/// Resolve the auto strategy from query shape: quoted or very short
/// queries want exact keywords, long conceptual queries want semantics
fn resolve_strategy(query: &str) -> RetrievalStrategy {
    let word_count = query.split_whitespace().count();
    if query.contains('"') || word_count <= 2 {
        RetrievalStrategy::Keyword
    } else if word_count >= 8 {
        RetrievalStrategy::Semantic
    } else {
        RetrievalStrategy::Hybrid
    }
}
