//! Configuration for the cache and its subsystems
//!
//! Every knob has a serde default so partial configs deserialize cleanly.

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StratumConfig {
    #[serde(default)]
    pub immediate: ImmediateConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub keyword: KeywordConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub retrieve: RetrieveConfig,
    #[serde(default)]
    pub cache: ResponseCacheConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
}

/// Immediate tier: FIFO ring with TTL and token cap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmediateConfig {
    #[serde(default = "default_immediate_capacity")]
    pub capacity: usize,
    #[serde(default = "default_immediate_ttl")]
    pub ttl_seconds: i64,
    #[serde(default = "default_immediate_token_cap")]
    pub token_cap: u32,
}

fn default_immediate_capacity() -> usize {
    10
}

fn default_immediate_ttl() -> i64 {
    3600
}

fn default_immediate_token_cap() -> u32 {
    2048
}

impl Default for ImmediateConfig {
    fn default() -> Self {
        Self {
            capacity: default_immediate_capacity(),
            ttl_seconds: default_immediate_ttl(),
            token_cap: default_immediate_token_cap(),
        }
    }
}

/// Session tier: per-conversation LRU with weighted eviction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_capacity")]
    pub capacity_per_conv: usize,
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: usize,
    #[serde(default = "default_session_half_life")]
    pub half_life_seconds: i64,
}

fn default_session_capacity() -> usize {
    50
}

fn default_consolidation_threshold() -> usize {
    20
}

fn default_session_half_life() -> i64 {
    1800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity_per_conv: default_session_capacity(),
            consolidation_threshold: default_consolidation_threshold(),
            half_life_seconds: default_session_half_life(),
        }
    }
}

/// Keyword index ranking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordConfig {
    #[serde(default = "default_k1")]
    pub k1: f32,
    #[serde(default = "default_b")]
    pub b: f32,
}

fn default_k1() -> f32 {
    1.5
}

fn default_b() -> f32 {
    0.75
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

/// Chunker sizing parameters (characters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_chunk_target")]
    pub target: usize,
    #[serde(default = "default_chunk_min")]
    pub min: usize,
    #[serde(default = "default_chunk_max")]
    pub max: usize,
    #[serde(default = "default_base_overlap")]
    pub base_overlap: usize,
    /// Scale overlap with sentence density
    #[serde(default = "default_true")]
    pub adaptive: bool,
}

fn default_chunk_target() -> usize {
    512
}

fn default_chunk_min() -> usize {
    100
}

fn default_chunk_max() -> usize {
    1024
}

fn default_base_overlap() -> usize {
    50
}

fn default_true() -> bool {
    true
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target: default_chunk_target(),
            min: default_chunk_min(),
            max: default_chunk_max(),
            base_overlap: default_base_overlap(),
            adaptive: default_true(),
        }
    }
}

impl ChunkerConfig {
    /// Upper bound for adaptive overlap
    pub fn max_overlap(&self) -> usize {
        (self.max / 3).min(200)
    }
}

/// Fusion channel weights; weights of absent channels are redistributed
/// proportionally at fuse time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f32,
}

fn default_semantic_weight() -> f32 {
    0.5
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_graph_weight() -> f32 {
    0.2
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            graph_weight: default_graph_weight(),
        }
    }
}

/// Retrieval limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_deadline_ms() -> u64 {
    2000
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

/// Response cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: i64,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> i64 {
    300
}

fn default_cache_entries() -> usize {
    1000
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

/// Access-count thresholds for tier promotion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    #[serde(default = "default_immediate_to_session")]
    pub immediate_to_session_access: u32,
    #[serde(default = "default_session_to_longterm")]
    pub session_to_longterm_access: u32,
}

fn default_immediate_to_session() -> u32 {
    3
}

fn default_session_to_longterm() -> u32 {
    5
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            immediate_to_session_access: default_immediate_to_session(),
            session_to_longterm_access: default_session_to_longterm(),
        }
    }
}
