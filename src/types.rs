//! Core types for stratum

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a context item (opaque, stable across tier moves)
pub type ItemId = String;

/// Semantically reserved metadata keys
pub mod meta_keys {
    /// Conversation the item belongs to
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Task the item belongs to
    pub const TASK_ID: &str = "task_id";
    /// Ordered sequence of string tags
    pub const TAGS: &str = "tags";
    /// Item kind override
    pub const TYPE: &str = "type";
    /// Priority name used for routing
    pub const IMPORTANCE: &str = "importance";
    /// Consolidation topic override
    pub const TOPIC: &str = "topic";
}

/// A context item, the unit of storage across all tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    /// Unique identifier
    pub id: ItemId,
    /// Textual payload
    pub content: String,
    /// Item kind
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Priority, defines the importance weight
    #[serde(default)]
    pub priority: Priority,
    /// Free-form scalar metadata; reserved keys in [`meta_keys`]
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item was last accessed
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times accessed
    #[serde(default)]
    pub access_count: u32,
    /// Token contribution, computed once at ingest (immutable thereafter)
    pub token_estimate: u32,
    /// Caller hint for tier routing
    pub tier_hint: Option<TierHint>,
}

impl ContextItem {
    /// Conversation id from metadata, if present
    pub fn conversation_id(&self) -> Option<&str> {
        self.metadata
            .get(meta_keys::CONVERSATION_ID)
            .and_then(|v| v.as_str())
    }

    /// Task id from metadata, if present
    pub fn task_id(&self) -> Option<&str> {
        self.metadata.get(meta_keys::TASK_ID).and_then(|v| v.as_str())
    }

    /// Ordered tags from metadata
    pub fn tags(&self) -> Vec<&str> {
        self.metadata
            .get(meta_keys::TAGS)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    /// Record an access: `access_count` and `last_accessed_at` move together
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// Cheap token estimate: ceil(chars / 4) over Unicode scalar values
pub fn estimate_tokens(content: &str) -> u32 {
    let chars = content.chars().count();
    ((chars + 3) / 4) as u32
}

/// Validate a metadata map: scalar values only, except `tags` which must be
/// an array of strings
pub fn validate_metadata(metadata: &HashMap<String, serde_json::Value>) -> Result<(), String> {
    for (key, value) in metadata {
        if key == meta_keys::TAGS {
            let ok = value
                .as_array()
                .map(|arr| arr.iter().all(|v| v.is_string()))
                .unwrap_or(false);
            if !ok {
                return Err(format!("metadata key '{key}' must be an array of strings"));
            }
            continue;
        }
        if !(value.is_string() || value.is_number() || value.is_boolean()) {
            return Err(format!("metadata key '{key}' must be a scalar value"));
        }
    }
    Ok(())
}

/// Context item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Preference,
    Fact,
    Task,
    #[default]
    Note,
    Conversation,
    Document,
    Code,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Preference => "preference",
            ItemKind::Fact => "fact",
            ItemKind::Task => "task",
            ItemKind::Note => "note",
            ItemKind::Conversation => "conversation",
            ItemKind::Document => "document",
            ItemKind::Code => "code",
        }
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(ItemKind::Preference),
            "fact" => Ok(ItemKind::Fact),
            "task" => Ok(ItemKind::Task),
            "note" => Ok(ItemKind::Note),
            "conversation" => Ok(ItemKind::Conversation),
            "document" => Ok(ItemKind::Document),
            "code" => Ok(ItemKind::Code),
            _ => Err(format!("Unknown item kind: {}", s)),
        }
    }
}

/// Item priority; variants are declared in ascending order so comparisons
/// like `priority >= Priority::High` work directly
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Minimal,
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Importance weight used in eviction and scoring
    pub fn weight(&self) -> f32 {
        match self {
            Priority::Critical => 1.5,
            Priority::High => 1.2,
            Priority::Normal => 1.0,
            Priority::Low => 0.7,
            Priority::Minimal => 0.4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Minimal => "minimal",
        }
    }

    /// Map a numeric importance onto a priority using midpoints between the
    /// defined weights
    pub fn from_weight(weight: f32) -> Self {
        if weight >= 1.35 {
            Priority::Critical
        } else if weight >= 1.1 {
            Priority::High
        } else if weight >= 0.85 {
            Priority::Normal
        } else if weight >= 0.55 {
            Priority::Low
        } else {
            Priority::Minimal
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "minimal" => Ok(Priority::Minimal),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Caller hint for tier routing on store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TierHint {
    Immediate,
    Session,
    LongTerm,
    #[default]
    Auto,
}

/// The three storage tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Immediate,
    Session,
    LongTerm,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Immediate => "immediate",
            SourceTier::Session => "session",
            SourceTier::LongTerm => "long_term",
        }
    }
}

/// A chunk produced from a long item for indexing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Derived `{parent_id}#{ordinal}`
    pub chunk_id: String,
    /// Originating item id
    pub parent_id: ItemId,
    /// Substring of the parent content
    pub content: String,
    /// 0-based position
    pub ordinal: usize,
    /// Leading characters shared with the previous chunk (0 for ordinal 0)
    pub overlap_prev_chars: usize,
}

impl Chunk {
    /// Recover the parent item id from a chunk or plain document id
    pub fn parent_of(doc_id: &str) -> &str {
        doc_id.split('#').next().unwrap_or(doc_id)
    }
}

/// Retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    Recency,
    Relevance,
    #[default]
    Hybrid,
    Semantic,
    Keyword,
    Graph,
    /// Resolved from query shape before fan-out
    Auto,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Recency => "recency",
            RetrievalStrategy::Relevance => "relevance",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Semantic => "semantic",
            RetrievalStrategy::Keyword => "keyword",
            RetrievalStrategy::Graph => "graph",
            RetrievalStrategy::Auto => "auto",
        }
    }
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recency" => Ok(RetrievalStrategy::Recency),
            "relevance" => Ok(RetrievalStrategy::Relevance),
            "hybrid" => Ok(RetrievalStrategy::Hybrid),
            "semantic" => Ok(RetrievalStrategy::Semantic),
            "keyword" => Ok(RetrievalStrategy::Keyword),
            "graph" => Ok(RetrievalStrategy::Graph),
            "auto" => Ok(RetrievalStrategy::Auto),
            _ => Err(format!("Unknown retrieval strategy: {}", s)),
        }
    }
}

/// Input for storing a context item
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub conversation_id: Option<String>,
    pub tier_hint: Option<TierHint>,
}

impl StoreRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_tier_hint(mut self, hint: TierHint) -> Self {
        self.tier_hint = Some(hint);
        self
    }
}

/// Outcome of a store: the new id and the tiers that admitted the item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub id: ItemId,
    pub admitted: Vec<SourceTier>,
}

/// A retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Token budget for the response (None = configured default)
    pub max_tokens: Option<u32>,
    pub conversation_id: Option<String>,
    /// Restrict results to these kinds
    pub kinds: Option<Vec<ItemKind>>,
    pub min_score: Option<f32>,
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    /// Only items created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only items created at or before this instant
    pub until: Option<DateTime<Utc>>,
}

fn default_max_results() -> usize {
    10
}

impl Default for RetrieveRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            max_results: default_max_results(),
            max_tokens: None,
            conversation_id: None,
            kinds: None,
            min_score: None,
            strategy: RetrievalStrategy::default(),
            since: None,
            until: None,
        }
    }
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// Per-channel diagnostic scores for a fused result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub keyword: Option<f32>,
    pub semantic: Option<f32>,
    pub graph: Option<f32>,
    pub recency: Option<f32>,
}

impl ComponentScores {
    /// Number of channels that contributed
    pub fn present(&self) -> usize {
        [
            self.keyword.is_some(),
            self.semantic.is_some(),
            self.graph.is_some(),
            self.recency.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }
}

/// One ranked entry of a retrieval response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: ContextItem,
    pub score: f32,
    pub source_tier: SourceTier,
    pub component_scores: ComponentScores,
}

/// Per-tier result counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub immediate: usize,
    pub session: usize,
    pub long_term: usize,
}

impl TierCounts {
    pub fn record(&mut self, tier: SourceTier) {
        match tier {
            SourceTier::Immediate => self.immediate += 1,
            SourceTier::Session => self.session += 1,
            SourceTier::LongTerm => self.long_term += 1,
        }
    }
}

/// Ordered retrieval response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub results: Vec<ScoredItem>,
    /// Candidates seen before budget truncation
    pub total_retrieved: usize,
    pub cache_hit: bool,
    /// Set when at least one sub-query failed or timed out
    pub degraded: bool,
    pub tier_counts: TierCounts,
}

/// Scope for [`clear`](crate::Orchestrator::clear)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    Immediate,
    /// A single conversation, or every conversation when None
    Session(Option<String>),
    All,
}

/// Filter applied by tier scans
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kinds: Option<Vec<ItemKind>>,
    pub conversation_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ItemFilter {
    pub fn matches(&self, item: &ContextItem) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&item.kind) {
                return false;
            }
        }
        if let Some(ref conv) = self.conversation_id {
            if item.conversation_id() != Some(conv.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if item.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if item.created_at > until {
                return false;
            }
        }
        true
    }

    pub fn from_request(request: &RetrieveRequest) -> Self {
        Self {
            kinds: request.kinds.clone(),
            conversation_id: request.conversation_id.clone(),
            since: request.since,
            until: request.until,
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub immediate_items: usize,
    pub immediate_tokens: u64,
    pub session_conversations: usize,
    pub session_items: usize,
    pub long_term_items: usize,
    pub stores: u64,
    pub retrievals: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_entries: usize,
    pub degraded_responses: u64,
    pub source_failures: u64,
    pub promotions_to_session: u64,
    pub promotions_to_long_term: u64,
}
