//! Session tier: per-conversation LRU with importance-weighted eviction
//!
//! Each conversation has its own lock so cross-conversation traffic runs in
//! parallel. Operations spanning every conversation acquire the locks in
//! sorted `conversation_id` order.
//!
//! Entries move through `fresh -> warm -> hot` as access accumulates; hot
//! entries are the promotion candidates for the long-term tier.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::text::{jaccard, term_set};
use crate::types::{meta_keys, ContextItem, ItemFilter, ItemKind, Priority};

/// Access-driven lifecycle of a session entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    Warm,
    /// Promotion candidate for the long-term tier
    Hot,
}

impl EntryState {
    pub fn of(item: &ContextItem) -> Self {
        if item.access_count >= 10 && item.priority >= Priority::High {
            EntryState::Hot
        } else if item.access_count >= 3 {
            EntryState::Warm
        } else {
            EntryState::Fresh
        }
    }
}

/// Front-of-deque = most recently used
struct Conversation {
    entries: VecDeque<ContextItem>,
}

/// Per-conversation LRU tier
pub struct SessionTier {
    config: SessionConfig,
    clock: SharedClock,
    conversations: DashMap<String, Arc<Mutex<Conversation>>>,
}

impl SessionTier {
    pub fn new(config: SessionConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            conversations: DashMap::new(),
        }
    }

    fn conversation(&self, conversation_id: &str) -> Arc<Mutex<Conversation>> {
        self.conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Conversation {
                    entries: VecDeque::new(),
                }))
            })
            .clone()
    }

    /// Conversation ids in deterministic lock order
    fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Eviction weight; lower weights leave first
    fn weight(&self, item: &ContextItem, now: chrono::DateTime<chrono::Utc>) -> f32 {
        let idle = (now - item.last_accessed_at).num_seconds().max(0) as f32;
        let decay = (-idle / (2.0 * self.config.half_life_seconds as f32)).exp();
        item.priority.weight() * (1.0 + (item.access_count as f32).ln_1p()) * decay
    }

    /// Insert or move-to-front; on overflow evict the minimum-weight entry.
    /// Returns the evicted item, if any.
    pub fn add(&self, item: ContextItem, conversation_id: &str) -> Option<ContextItem> {
        let now = self.clock.now();
        let conv = self.conversation(conversation_id);
        let mut conv = conv.lock();

        if let Some(pos) = conv.entries.iter().position(|e| e.id == item.id) {
            conv.entries.remove(pos);
        }
        conv.entries.push_front(item);

        if conv.entries.len() <= self.config.capacity_per_conv {
            return None;
        }

        let evict_pos = conv
            .entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                self.weight(a, now)
                    .partial_cmp(&self.weight(b, now))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(pos, _)| pos);

        let evicted = evict_pos.and_then(|pos| conv.entries.remove(pos));
        if let Some(ref evicted) = evicted {
            debug!(id = %evicted.id, conversation = conversation_id, "session: evicted");
        }
        evicted
    }

    /// Bump to front and record the access
    pub fn touch(&self, conversation_id: &str, id: &str) -> Option<ContextItem> {
        let now = self.clock.now();
        let conv = self.conversations.get(conversation_id)?.clone();
        let mut conv = conv.lock();

        let pos = conv.entries.iter().position(|e| e.id == id)?;
        let mut item = conv.entries.remove(pos)?;
        item.mark_accessed(now);
        conv.entries.push_front(item.clone());
        Some(item)
    }

    /// Scored scan across one conversation or all of them
    pub fn search(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        filter: Option<&ItemFilter>,
    ) -> Vec<(ContextItem, f32)> {
        let now = self.clock.now();
        let query_terms = term_set(query);
        let half_life = self.config.half_life_seconds as f32;

        let ids: Vec<String> = match conversation_id {
            Some(id) => vec![id.to_string()],
            None => self.sorted_ids(),
        };

        let mut scored = Vec::new();
        for conv_id in ids {
            let Some(conv) = self.conversations.get(&conv_id).map(|e| e.clone()) else {
                continue;
            };
            let conv = conv.lock();
            for item in &conv.entries {
                if !filter.map_or(true, |f| f.matches(item)) {
                    continue;
                }
                let idle = (now - item.last_accessed_at).num_seconds().max(0) as f32;
                let decay = (-idle / (2.0 * half_life)).exp();
                let relevance = 0.5 * jaccard(&query_terms, &term_set(&item.content))
                    + 0.3 * decay
                    + 0.2 * item.priority.weight() / 1.5;
                scored.push((item.clone(), relevance));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored
    }

    /// Fold runs of adjacent same-topic conversation/note items into single
    /// synthesized items once the conversation holds enough of them.
    /// Returns the number of runs folded.
    pub fn consolidate(&self, conversation_id: &str) -> usize {
        let now = self.clock.now();
        let Some(conv) = self.conversations.get(conversation_id).map(|e| e.clone()) else {
            return 0;
        };
        let mut conv = conv.lock();

        let foldable = conv
            .entries
            .iter()
            .filter(|e| matches!(e.kind, ItemKind::Conversation | ItemKind::Note))
            .count();
        if foldable < self.config.consolidation_threshold {
            return 0;
        }

        let mut folded = 0usize;
        let mut result: VecDeque<ContextItem> = VecDeque::new();
        let mut run: Vec<ContextItem> = Vec::new();

        let entries = std::mem::take(&mut conv.entries);
        for item in entries {
            let joins_run = matches!(item.kind, ItemKind::Conversation | ItemKind::Note)
                && run
                    .last()
                    .map_or(true, |prev| topic_key(prev) == topic_key(&item));

            if joins_run {
                run.push(item);
                continue;
            }

            flush_run(&mut result, &mut run, &mut folded, conversation_id, now);
            if matches!(item.kind, ItemKind::Conversation | ItemKind::Note) {
                run.push(item);
            } else {
                result.push_back(item);
            }
        }
        flush_run(&mut result, &mut run, &mut folded, conversation_id, now);

        conv.entries = result;
        folded
    }

    /// Consolidate every conversation, in deterministic id order
    pub fn consolidate_all(&self) -> usize {
        self.sorted_ids()
            .iter()
            .map(|id| self.consolidate(id))
            .sum()
    }

    /// Remove one conversation or all of them; returns items cleared
    pub fn clear(&self, conversation_id: Option<&str>) -> usize {
        match conversation_id {
            Some(id) => match self.conversations.remove(id) {
                Some((_, conv)) => conv.lock().entries.len(),
                None => 0,
            },
            None => {
                let mut cleared = 0;
                for id in self.sorted_ids() {
                    if let Some((_, conv)) = self.conversations.remove(&id) {
                        cleared += conv.lock().entries.len();
                    }
                }
                cleared
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<ContextItem> {
        for conv_id in self.sorted_ids() {
            let Some(conv) = self.conversations.get(&conv_id).map(|e| e.clone()) else {
                continue;
            };
            let conv = conv.lock();
            if let Some(item) = conv.entries.iter().find(|e| e.id == id) {
                return Some(item.clone());
            }
        }
        None
    }

    pub fn delete(&self, id: &str) -> bool {
        for conv_id in self.sorted_ids() {
            let Some(conv) = self.conversations.get(&conv_id).map(|e| e.clone()) else {
                continue;
            };
            let mut conv = conv.lock();
            if let Some(pos) = conv.entries.iter().position(|e| e.id == id) {
                conv.entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Items of one conversation, LRU front first
    pub fn list(&self, conversation_id: &str) -> Vec<ContextItem> {
        match self.conversations.get(conversation_id) {
            Some(conv) => {
                let conv = conv.clone();
                let conv = conv.lock();
                conv.entries.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn conversation_len(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map(|conv| conv.lock().entries.len())
            .unwrap_or(0)
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn total_items(&self) -> usize {
        self.sorted_ids()
            .iter()
            .map(|id| self.conversation_len(id))
            .sum()
    }
}

/// Topic bucket for consolidation runs
fn topic_key(item: &ContextItem) -> String {
    if let Some(topic) = item.metadata.get(meta_keys::TOPIC).and_then(|v| v.as_str()) {
        return topic.to_string();
    }
    if let Some(tag) = item.tags().first() {
        return (*tag).to_string();
    }
    if let Some(task) = item.task_id() {
        return task.to_string();
    }
    "general".to_string()
}

/// Replace a run of two or more items with one synthesized item
fn flush_run(
    result: &mut VecDeque<ContextItem>,
    run: &mut Vec<ContextItem>,
    folded: &mut usize,
    conversation_id: &str,
    now: chrono::DateTime<chrono::Utc>,
) {
    match run.len() {
        0 => {}
        1 => {
            if let Some(single) = run.pop() {
                result.push_back(single);
            }
        }
        _ => {
            let sources = std::mem::take(run);
            result.push_back(synthesize(sources, conversation_id, now));
            *folded += 1;
        }
    }
    run.clear();
}

/// Build the consolidated item from its sources
fn synthesize(
    mut sources: Vec<ContextItem>,
    conversation_id: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> ContextItem {
    sources.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let content = sources
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");
    let priority = sources
        .iter()
        .map(|s| s.priority)
        .max()
        .unwrap_or_default();
    let access_count = sources.iter().map(|s| s.access_count).max().unwrap_or(0);
    let created_at = sources.iter().map(|s| s.created_at).min().unwrap_or(now);
    let last_accessed_at = sources
        .iter()
        .map(|s| s.last_accessed_at)
        .max()
        .unwrap_or(now);

    let mut metadata = std::collections::HashMap::new();
    metadata.insert(
        meta_keys::CONVERSATION_ID.to_string(),
        serde_json::Value::String(conversation_id.to_string()),
    );
    if let Some(first) = sources.first() {
        metadata.insert(
            meta_keys::TOPIC.to_string(),
            serde_json::Value::String(topic_key(first)),
        );
    }

    let token_estimate = crate::types::estimate_tokens(&content);

    ContextItem {
        id: Uuid::new_v4().to_string(),
        content,
        kind: ItemKind::Conversation,
        priority,
        metadata,
        created_at,
        last_accessed_at,
        access_count,
        token_estimate,
        tier_hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::types::estimate_tokens;
    use serde_json::json;
    use std::collections::HashMap;

    fn tier_with(capacity: usize) -> (SessionTier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let tier = SessionTier::new(
            SessionConfig {
                capacity_per_conv: capacity,
                consolidation_threshold: 4,
                half_life_seconds: 1800,
            },
            clock.clone(),
        );
        (tier, clock)
    }

    fn make_item(id: &str, content: &str, priority: Priority, clock: &ManualClock) -> ContextItem {
        ContextItem {
            id: id.to_string(),
            content: content.to_string(),
            kind: ItemKind::Note,
            priority,
            metadata: HashMap::new(),
            created_at: clock.now(),
            last_accessed_at: clock.now(),
            access_count: 0,
            token_estimate: estimate_tokens(content),
            tier_hint: None,
        }
    }

    #[test]
    fn test_lru_order_and_move_to_front() {
        let (tier, clock) = tier_with(10);
        tier.add(make_item("a", "one", Priority::Normal, &clock), "c1");
        tier.add(make_item("b", "two", Priority::Normal, &clock), "c1");
        tier.add(make_item("c", "three", Priority::Normal, &clock), "c1");

        let ids: Vec<String> = tier.list("c1").into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        tier.touch("c1", "a");
        let ids: Vec<String> = tier.list("c1").into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_eviction_by_lowest_weight() {
        let (tier, clock) = tier_with(3);
        tier.add(make_item("n1", "normal one", Priority::Normal, &clock), "c1");
        tier.add(make_item("l1", "low one", Priority::Low, &clock), "c1");
        tier.add(make_item("k1", "critical one", Priority::Critical, &clock), "c1");

        let evicted = tier.add(make_item("n2", "normal two", Priority::Normal, &clock), "c1");
        assert_eq!(evicted.unwrap().id, "l1");

        let ids: Vec<String> = tier.list("c1").into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["n2", "k1", "n1"]);
    }

    #[test]
    fn test_eviction_tie_breaks_by_oldest_access() {
        let (tier, clock) = tier_with(2);
        tier.add(make_item("a", "same", Priority::Normal, &clock), "c1");
        clock.advance_secs(10);
        tier.add(make_item("b", "same", Priority::Normal, &clock), "c1");
        clock.advance_secs(10);

        let evicted = tier.add(make_item("c", "same", Priority::Normal, &clock), "c1");
        // "a" has the oldest last_accessed_at and the deepest decay
        assert_eq!(evicted.unwrap().id, "a");
    }

    #[test]
    fn test_access_count_raises_weight() {
        let (tier, clock) = tier_with(2);
        tier.add(make_item("a", "same", Priority::Normal, &clock), "c1");
        tier.add(make_item("b", "same", Priority::Normal, &clock), "c1");
        for _ in 0..5 {
            tier.touch("c1", "a");
        }

        let evicted = tier.add(make_item("c", "same", Priority::Normal, &clock), "c1");
        assert_eq!(evicted.unwrap().id, "b");
    }

    #[test]
    fn test_capacity_invariant_holds() {
        let (tier, clock) = tier_with(5);
        for i in 0..40 {
            tier.add(
                make_item(&format!("i{}", i), "content", Priority::Normal, &clock),
                "c1",
            );
            assert!(tier.conversation_len("c1") <= 5);
        }
    }

    #[test]
    fn test_search_scoring_components() {
        let (tier, clock) = tier_with(10);
        tier.add(
            make_item("match", "rust cache retrieval", Priority::Normal, &clock),
            "c1",
        );
        tier.add(
            make_item("other", "completely different topic", Priority::Normal, &clock),
            "c1",
        );

        let hits = tier.search("rust cache retrieval", Some("c1"), None);
        assert_eq!(hits[0].0.id, "match");
        assert!(hits[0].1 > hits[1].1);

        // priority lifts an otherwise identical item
        let (tier, clock) = tier_with(10);
        tier.add(make_item("hi", "same words", Priority::Critical, &clock), "c1");
        tier.add(make_item("lo", "same words", Priority::Minimal, &clock), "c1");
        let hits = tier.search("same words", Some("c1"), None);
        assert_eq!(hits[0].0.id, "hi");
    }

    #[test]
    fn test_search_all_conversations_deterministic() {
        let (tier, clock) = tier_with(10);
        tier.add(make_item("b1", "same words", Priority::Normal, &clock), "conv-b");
        tier.add(make_item("a1", "same words", Priority::Normal, &clock), "conv-a");

        let hits = tier.search("same words", None, None);
        assert_eq!(hits.len(), 2);
        // equal scores fall back to id order
        assert_eq!(hits[0].0.id, "a1");
    }

    #[test]
    fn test_entry_state_machine() {
        let (tier, clock) = tier_with(10);
        tier.add(make_item("a", "content", Priority::High, &clock), "c1");

        assert_eq!(EntryState::of(&tier.get("a").unwrap()), EntryState::Fresh);

        for _ in 0..3 {
            tier.touch("c1", "a");
        }
        assert_eq!(EntryState::of(&tier.get("a").unwrap()), EntryState::Warm);

        for _ in 0..7 {
            tier.touch("c1", "a");
        }
        assert_eq!(EntryState::of(&tier.get("a").unwrap()), EntryState::Hot);

        // high access without high priority never reaches hot
        let mut low = make_item("b", "content", Priority::Normal, &clock);
        low.access_count = 50;
        assert_eq!(EntryState::of(&low), EntryState::Warm);
    }

    #[test]
    fn test_consolidation_folds_adjacent_topics() {
        let (tier, clock) = tier_with(50);
        for i in 0..3 {
            let mut item = make_item(
                &format!("r{}", i),
                &format!("rust note {}", i),
                Priority::Normal,
                &clock,
            );
            item.metadata
                .insert(meta_keys::TOPIC.to_string(), json!("rust"));
            clock.advance_secs(1);
            tier.add(item, "c1");
        }
        for i in 0..2 {
            let mut item = make_item(
                &format!("p{}", i),
                &format!("python note {}", i),
                Priority::High,
                &clock,
            );
            item.metadata
                .insert(meta_keys::TOPIC.to_string(), json!("python"));
            clock.advance_secs(1);
            tier.add(item, "c1");
        }

        assert_eq!(tier.conversation_len("c1"), 5);
        let folded = tier.consolidate("c1");
        assert_eq!(folded, 2);
        assert_eq!(tier.conversation_len("c1"), 2);

        let items = tier.list("c1");
        // LRU front holds the python run (most recent)
        assert_eq!(items[0].kind, ItemKind::Conversation);
        assert_eq!(items[0].priority, Priority::High);
        assert!(items[0].content.contains("python note 0"));
        assert!(items[0].content.contains("\n---\n"));
        assert!(items[1].content.contains("rust note 2"));
    }

    #[test]
    fn test_consolidation_below_threshold_is_noop() {
        let (tier, clock) = tier_with(50);
        tier.add(make_item("a", "one", Priority::Normal, &clock), "c1");
        tier.add(make_item("b", "two", Priority::Normal, &clock), "c1");
        assert_eq!(tier.consolidate("c1"), 0);
        assert_eq!(tier.conversation_len("c1"), 2);
    }

    #[test]
    fn test_clear_scopes() {
        let (tier, clock) = tier_with(10);
        tier.add(make_item("a", "one", Priority::Normal, &clock), "c1");
        tier.add(make_item("b", "two", Priority::Normal, &clock), "c2");

        assert_eq!(tier.clear(Some("c1")), 1);
        assert_eq!(tier.conversation_len("c1"), 0);
        assert_eq!(tier.clear(None), 1);
        assert_eq!(tier.total_items(), 0);
    }

    #[test]
    fn test_delete_scans_conversations() {
        let (tier, clock) = tier_with(10);
        tier.add(make_item("a", "one", Priority::Normal, &clock), "c1");
        assert!(tier.delete("a"));
        assert!(!tier.delete("a"));
    }
}
