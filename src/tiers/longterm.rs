//! Long-term tier: adapter over the external collaborators
//!
//! Owns the authoritative item record (SQLite) and the mapping from item id
//! to the chunk ids indexed on its behalf. Content flows through the
//! chunker, each chunk lands in the keyword index and the vector store. A
//! failed write rolls back whatever had already been admitted so the tier
//! never holds partial state for an item.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::chunker::Chunker;
use crate::collaborators::{GraphStore, VectorStore};
use crate::collaborators::EmbeddingProvider;
use crate::error::{Result, StratumError};
use crate::keyword::KeywordIndex;
use crate::storage::RecordStore;
use crate::types::{meta_keys, ContextItem, ItemFilter};

/// Long-term adapter tier
pub struct LongTermTier {
    records: RecordStore,
    chunker: Chunker,
    keyword: Arc<RwLock<KeywordIndex>>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// item id -> chunk doc ids indexed for it
    doc_ids: RwLock<HashMap<String, Vec<String>>>,
}

impl LongTermTier {
    pub fn new(
        records: RecordStore,
        chunker: Chunker,
        keyword: Arc<RwLock<KeywordIndex>>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            records,
            chunker,
            keyword,
            vectors,
            graph,
            embedder,
            doc_ids: RwLock::new(HashMap::new()),
        }
    }

    /// Metadata exposed to keyword/vector filters at index time
    fn doc_metadata(item: &ContextItem) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        metadata.insert(
            "kind".to_string(),
            serde_json::Value::String(item.kind.as_str().to_string()),
        );
        metadata.insert(
            "parent_id".to_string(),
            serde_json::Value::String(item.id.clone()),
        );
        if let Some(conv) = item.conversation_id() {
            metadata.insert(
                meta_keys::CONVERSATION_ID.to_string(),
                serde_json::Value::String(conv.to_string()),
            );
        }
        metadata
    }

    /// Admit an item: chunk, index, embed, persist. Rolls back on failure.
    pub async fn add(&self, item: &ContextItem) -> Result<()> {
        let chunks = self.chunker.chunk(&item.id, &item.content);
        if chunks.is_empty() {
            return Err(StratumError::InvalidInput(
                "cannot admit empty content to long-term tier".to_string(),
            ));
        }

        let metadata = Self::doc_metadata(item);
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

        {
            let mut index = self.keyword.write();
            for chunk in &chunks {
                index.index(&chunk.chunk_id, &chunk.content, Some(metadata.clone()));
            }
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                self.rollback(&chunk_ids, 0).await;
                return Err(to_write_error(e, "embedding provider"));
            }
        };

        for (i, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
            if let Err(e) = self
                .vectors
                .upsert(&chunk.chunk_id, vector, metadata.clone())
                .await
            {
                self.rollback(&chunk_ids, i).await;
                return Err(to_write_error(e, "vector store"));
            }
        }

        if let Err(e) = self.records.put(item) {
            self.rollback(&chunk_ids, chunk_ids.len()).await;
            return Err(e);
        }

        self.doc_ids.write().insert(item.id.clone(), chunk_ids);
        debug!(id = %item.id, chunks = chunks.len(), "long-term: admitted");
        Ok(())
    }

    /// Undo a partial admit: all keyword docs plus the first
    /// `vectors_written` vector upserts
    async fn rollback(&self, chunk_ids: &[String], vectors_written: usize) {
        {
            let mut index = self.keyword.write();
            for chunk_id in chunk_ids {
                index.remove(chunk_id);
            }
        }
        for chunk_id in chunk_ids.iter().take(vectors_written) {
            if let Err(e) = self.vectors.delete(chunk_id).await {
                warn!(chunk = %chunk_id, error = %e, "long-term: rollback delete failed");
            }
        }
    }

    /// Delete an item, cascading to keyword, vector, and graph stores
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let record = self.records.get(id)?;
        let existed = self.records.delete(id)?;

        let chunk_ids = self.doc_ids.write().remove(id).or_else(|| {
            // Rebuild chunk ids for records that predate this process
            record
                .as_ref()
                .map(|item| {
                    self.chunker
                        .chunk(id, &item.content)
                        .into_iter()
                        .map(|c| c.chunk_id)
                        .collect()
                })
        });

        if let Some(chunk_ids) = chunk_ids {
            {
                let mut index = self.keyword.write();
                for chunk_id in &chunk_ids {
                    index.remove(chunk_id);
                }
            }
            for chunk_id in &chunk_ids {
                if let Err(e) = self.vectors.delete(chunk_id).await {
                    warn!(chunk = %chunk_id, error = %e, "long-term: vector delete failed");
                }
            }
        }

        if let Err(e) = self.graph.delete_entity(id).await {
            warn!(id, error = %e, "long-term: graph delete failed");
        }

        Ok(existed)
    }

    pub fn get(&self, id: &str) -> Result<Option<ContextItem>> {
        self.records.get(id)
    }

    pub fn scan(&self, filter: Option<&ItemFilter>) -> Result<Vec<ContextItem>> {
        let items = self.records.scan()?;
        Ok(items
            .into_iter()
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .collect())
    }

    pub fn count(&self) -> usize {
        self.records.count().unwrap_or(0)
    }

    pub fn contains(&self, id: &str) -> bool {
        matches!(self.records.get(id), Ok(Some(_)))
    }

    /// Persist updated access tracking
    pub fn touch(&self, id: &str, access_count: u32, last_accessed_at: DateTime<Utc>) {
        if let Err(e) = self.records.touch(id, access_count, last_accessed_at) {
            warn!(id, error = %e, "long-term: access update failed");
        }
    }

    /// Rebuild the keyword index and vector store from persisted records.
    /// Returns the number of items reindexed.
    pub async fn reindex(&self) -> Result<usize> {
        let items = self.records.scan()?;
        let mut reindexed = 0;

        for item in &items {
            let chunks = self.chunker.chunk(&item.id, &item.content);
            let metadata = Self::doc_metadata(item);
            let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

            {
                let mut index = self.keyword.write();
                for chunk in &chunks {
                    index.index(&chunk.chunk_id, &chunk.content, Some(metadata.clone()));
                }
            }

            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| to_write_error(e, "embedding provider"))?;
            for (chunk, vector) in chunks.iter().zip(vectors) {
                self.vectors
                    .upsert(&chunk.chunk_id, vector, metadata.clone())
                    .await
                    .map_err(|e| to_write_error(e, "vector store"))?;
            }

            self.doc_ids.write().insert(item.id.clone(), chunk_ids);
            reindexed += 1;
        }

        Ok(reindexed)
    }
}

/// Keep capacity errors as-is; everything else surfaces as a collaborator
/// write failure
fn to_write_error(e: StratumError, source: &str) -> StratumError {
    match e {
        StratumError::CapacityExhausted(_) => e,
        StratumError::Collaborator(_) => e,
        other => StratumError::Collaborator(format!("{}: {}", source, other)),
    }
}
