//! Immediate tier: fixed-capacity FIFO ring with TTL and token cap
//!
//! A single reader-writer lock guards the ring. Expired entries are
//! physically dropped on writes and filtered from every read, so no item
//! past its TTL is ever returned.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::ImmediateConfig;
use crate::text::{jaccard, term_set};
use crate::types::{ContextItem, ItemFilter, ItemId};

/// Recency half-life for the retrieval score
const HALF_LIFE_SECS: f32 = 1800.0;

struct Ring {
    items: VecDeque<ContextItem>,
    token_sum: u64,
}

/// FIFO ring tier
pub struct ImmediateTier {
    config: ImmediateConfig,
    clock: SharedClock,
    inner: RwLock<Ring>,
}

impl ImmediateTier {
    pub fn new(config: ImmediateConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: RwLock::new(Ring {
                items: VecDeque::new(),
                token_sum: 0,
            }),
        }
    }

    fn is_expired(&self, item: &ContextItem, now: chrono::DateTime<chrono::Utc>) -> bool {
        (now - item.created_at).num_seconds() > self.config.ttl_seconds
    }

    /// Append an item, evicting from the head until capacity and token cap
    /// both hold. Expired items are dropped first.
    pub fn add(&self, item: ContextItem) {
        let now = self.clock.now();
        let mut ring = self.inner.write();

        while ring
            .items
            .front()
            .map_or(false, |front| self.is_expired(front, now))
        {
            if let Some(expired) = ring.items.pop_front() {
                ring.token_sum -= expired.token_estimate as u64;
                debug!(id = %expired.id, "immediate: dropped expired item");
            }
        }

        ring.token_sum += item.token_estimate as u64;
        ring.items.push_back(item);

        while ring.items.len() > self.config.capacity
            || ring.token_sum > self.config.token_cap as u64
        {
            let Some(evicted) = ring.items.pop_front() else {
                break;
            };
            ring.token_sum -= evicted.token_estimate as u64;
            debug!(id = %evicted.id, "immediate: evicted from head");
        }
    }

    /// Live items newest-first, filters applied
    pub fn list(&self, filter: Option<&ItemFilter>) -> Vec<ContextItem> {
        let now = self.clock.now();
        let ring = self.inner.read();
        ring.items
            .iter()
            .rev()
            .filter(|item| !self.is_expired(item, now))
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ContextItem> {
        let now = self.clock.now();
        let ring = self.inner.read();
        ring.items
            .iter()
            .find(|item| item.id == id && !self.is_expired(item, now))
            .cloned()
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut ring = self.inner.write();
        if let Some(pos) = ring.items.iter().position(|item| item.id == id) {
            if let Some(removed) = ring.items.remove(pos) {
                ring.token_sum -= removed.token_estimate as u64;
            }
            true
        } else {
            false
        }
    }

    /// Bump access tracking for a returned item; both fields move together
    pub fn touch(&self, id: &str) -> Option<ContextItem> {
        let now = self.clock.now();
        let mut ring = self.inner.write();
        let item = ring
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .filter(|item| (now - item.created_at).num_seconds() <= self.config.ttl_seconds)?;
        item.mark_accessed(now);
        Some(item.clone())
    }

    /// Scored scan: recency decay plus a weak keyword-overlap bonus
    pub fn search(&self, query: &str, filter: Option<&ItemFilter>) -> Vec<(ContextItem, f32)> {
        let now = self.clock.now();
        let query_terms = term_set(query);
        let ring = self.inner.read();

        let mut scored: Vec<(ContextItem, f32)> = ring
            .items
            .iter()
            .rev()
            .filter(|item| !self.is_expired(item, now))
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .map(|item| {
                let age = (now - item.created_at).num_seconds().max(0) as f32;
                let recency = (-age / HALF_LIFE_SECS).exp();
                let overlap = 0.1 * jaccard(&query_terms, &term_set(&item.content));
                (item.clone(), recency + overlap)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    pub fn token_sum(&self) -> u64 {
        self.inner.read().token_sum
    }

    pub fn clear(&self) -> usize {
        let mut ring = self.inner.write();
        let count = ring.items.len();
        ring.items.clear();
        ring.token_sum = 0;
        count
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.get(id).is_some()
    }
}
