//! External collaborator interfaces
//!
//! The core depends on three thin abstractions: an embedding provider, a
//! vector store, and a graph store. Backends are selected by a variant tag
//! at construction; no runtime plugin discovery. The in-memory backends are
//! complete implementations suitable for tests and small deployments.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

/// Batch-capable embedding generator returning fixed-dimension vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

/// Vector similarity store; similarity scores are in [0, 1]
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<(String, f32)>>;
}

/// An edge returned by graph path queries
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub edge_type: String,
}

/// Entity/relationship store with centrality-scored search
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_entity(
        &self,
        id: &str,
        entity_type: &str,
        props: HashMap<String, serde_json::Value>,
    ) -> Result<()>;
    async fn upsert_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: &str,
        props: HashMap<String, serde_json::Value>,
    ) -> Result<()>;
    async fn search(&self, query: &str, max_depth: usize) -> Result<Vec<(String, f32)>>;
    async fn path(&self, a: &str, b: &str, max_depth: usize) -> Result<Option<Vec<GraphEdge>>>;
    /// Remove an entity and its edges (delete cascades reach the graph)
    async fn delete_entity(&self, id: &str) -> Result<()>;
}

/// Vector store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorBackend {
    #[default]
    InMemory,
}

impl VectorBackend {
    pub fn build(&self) -> Arc<dyn VectorStore> {
        match self {
            VectorBackend::InMemory => Arc::new(InMemoryVectorStore::default()),
        }
    }
}

/// Graph store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphBackend {
    #[default]
    InMemory,
}

impl GraphBackend {
    pub fn build(&self) -> Arc<dyn GraphStore> {
        match self {
            GraphBackend::InMemory => Arc::new(InMemoryGraphStore::default()),
        }
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Hash-based embedder using the hashing trick with signed features and
/// bigram mixing, L2-normalized. Deterministic and dependency-free, so the
/// semantic path works without a network provider.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() > 1)
            .map(String::from)
            .collect()
    }

    fn hash_index(token: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    fn hash_sign(token: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}_sign", token).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0f32; self.dimensions];

        if tokens.is_empty() {
            return embedding;
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let weight = (1.0 + count / doc_len).ln();
            let idx = Self::hash_index(token, self.dimensions);
            embedding[idx] += weight * Self::hash_sign(token);
        }

        for window in tokens.windows(2) {
            let bigram = format!("{}_{}", window[0], window[1]);
            let idx = Self::hash_index(&bigram, self.dimensions);
            embedding[idx] += 0.5 * Self::hash_sign(&bigram);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Brute-force in-memory vector store
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, (Vec<f32>, HashMap<String, serde_json::Value>)>>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.entries
            .write()
            .insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<Vec<(String, f32)>> {
        let entries = self.entries.read();
        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .filter(|(_, (_, metadata))| {
                filter.map_or(true, |f| {
                    f.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
                })
            })
            .map(|(id, (candidate, _))| {
                // cosine mapped from [-1, 1] onto [0, 1]
                let similarity = (cosine_similarity(vector, candidate) + 1.0) / 2.0;
                (id.clone(), similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

#[derive(Debug, Clone)]
struct GraphEntity {
    entity_type: String,
    props: HashMap<String, serde_json::Value>,
}

#[derive(Default)]
struct GraphState {
    entities: HashMap<String, GraphEntity>,
    /// from -> [(to, edge_type)]
    adjacency: HashMap<String, Vec<(String, String)>>,
}

/// Adjacency-map in-memory graph store with degree-centrality search
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    fn neighbors(state: &GraphState, id: &str) -> Vec<(String, String)> {
        state.adjacency.get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(
        &self,
        id: &str,
        entity_type: &str,
        props: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.state.write().entities.insert(
            id.to_string(),
            GraphEntity {
                entity_type: entity_type.to_string(),
                props,
            },
        );
        Ok(())
    }

    async fn upsert_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: &str,
        _props: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let forward = state.adjacency.entry(from.to_string()).or_default();
        if !forward.iter().any(|(t, e)| t == to && e == edge_type) {
            forward.push((to.to_string(), edge_type.to_string()));
        }
        let backward = state.adjacency.entry(to.to_string()).or_default();
        if !backward.iter().any(|(t, e)| t == from && e == edge_type) {
            backward.push((from.to_string(), edge_type.to_string()));
        }
        Ok(())
    }

    /// Seed entities are those whose id, type, or props match a query
    /// token; matches expand to neighbors with decaying scores up to
    /// `max_depth`. Scores combine match strength with degree centrality.
    async fn search(&self, query: &str, max_depth: usize) -> Result<Vec<(String, f32)>> {
        let state = self.state.read();
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let max_degree = state
            .adjacency
            .values()
            .map(|n| n.len())
            .max()
            .unwrap_or(0)
            .max(1) as f32;

        let mut scores: HashMap<String, f32> = HashMap::new();
        for (id, entity) in &state.entities {
            let haystack = format!(
                "{} {} {}",
                id.to_lowercase(),
                entity.entity_type.to_lowercase(),
                serde_json::to_string(&entity.props)
                    .unwrap_or_default()
                    .to_lowercase()
            );
            let matched = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
            if matched == 0 {
                continue;
            }

            let degree = Self::neighbors(&state, id).len() as f32;
            let centrality = degree / max_degree;
            let score = (matched as f32 / tokens.len() as f32) * 0.7 + centrality * 0.3;
            scores.insert(id.clone(), score);
        }

        // Expand from matched seeds with per-hop decay
        let seeds: Vec<(String, f32)> = scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (seed, seed_score) in seeds {
            let mut frontier = vec![seed];
            let mut decay = 0.5f32;
            for _ in 0..max_depth {
                let mut next = Vec::new();
                for node in &frontier {
                    for (neighbor, _) in Self::neighbors(&state, node) {
                        let hop_score = seed_score * decay;
                        let entry = scores.entry(neighbor.clone()).or_insert(0.0);
                        if hop_score > *entry {
                            *entry = hop_score;
                        }
                        next.push(neighbor);
                    }
                }
                frontier = next;
                decay *= 0.5;
            }
        }

        let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(ranked)
    }

    /// Breadth-first shortest path between two entities
    async fn path(&self, a: &str, b: &str, max_depth: usize) -> Result<Option<Vec<GraphEdge>>> {
        let state = self.state.read();
        if !state.entities.contains_key(a) || !state.entities.contains_key(b) {
            return Ok(None);
        }
        if a == b {
            return Ok(Some(Vec::new()));
        }

        let mut visited: HashMap<String, (String, String)> = HashMap::new();
        let mut frontier = vec![a.to_string()];

        'bfs: for _ in 0..max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                for (neighbor, edge_type) in Self::neighbors(&state, node) {
                    if neighbor == a || visited.contains_key(&neighbor) {
                        continue;
                    }
                    visited.insert(neighbor.clone(), (node.clone(), edge_type));
                    if neighbor == b {
                        break 'bfs;
                    }
                    next.push(neighbor);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        if !visited.contains_key(b) {
            return Ok(None);
        }

        let mut edges = Vec::new();
        let mut cursor = b.to_string();
        while cursor != a {
            let (parent, edge_type) = visited[&cursor].clone();
            edges.push(GraphEdge {
                from: parent.clone(),
                to: cursor,
                edge_type,
            });
            cursor = parent;
        }
        edges.reverse();
        Ok(Some(edges))
    }

    async fn delete_entity(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.entities.remove(id);
        state.adjacency.remove(id);
        for neighbors in state.adjacency.values_mut() {
            neighbors.retain(|(to, _)| to != id);
        }
        Ok(())
    }
}
