//! Property-based tests for stratum
//!
//! These tests verify invariants that must hold for all inputs:
//! - Chunker reconstruction and bounds
//! - Tokenizer determinism and contract
//! - Fusion normalization stability
//! - Tier capacity bounds under arbitrary operation sequences
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// CHUNKER TESTS
// ============================================================================

mod chunker_tests {
    use super::*;
    use stratum::chunker::Chunker;
    use stratum::config::ChunkerConfig;

    fn reconstruct(chunks: &[stratum::types::Chunk]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            out.extend(chunk.content.chars().skip(chunk.overlap_prev_chars));
        }
        out
    }

    proptest! {
        /// Invariant: chunking never panics on any input
        #[test]
        fn never_panics(s in "\\PC{0,2000}") {
            let chunker = Chunker::default();
            let _ = chunker.chunk("p", &s);
        }

        /// Invariant: concatenating non-overlapping chunk suffixes yields
        /// exactly the original text
        #[test]
        fn reconstruction_roundtrip(s in "[ -~]{0,1800}") {
            let chunker = Chunker::default();
            let chunks = chunker.chunk("p", &s);
            prop_assert_eq!(reconstruct(&chunks), s);
        }

        /// Invariant: reconstruction also holds for multi-byte text
        #[test]
        fn reconstruction_unicode(s in "\\PC{0,600}") {
            let chunker = Chunker::default();
            let chunks = chunker.chunk("p", &s);
            prop_assert_eq!(reconstruct(&chunks), s);
        }

        /// Invariant: no chunk ever exceeds the configured max
        #[test]
        fn max_bound_holds(s in "[ -~]{0,3000}") {
            let chunker = Chunker::default();
            for chunk in chunker.chunk("p", &s) {
                prop_assert!(chunk.content.chars().count() <= 1024);
            }
        }

        /// Invariant: ordinals are sequential and ids derive from the parent
        #[test]
        fn ordinals_sequential(s in "[ -~]{0,2000}") {
            let chunker = Chunker::default();
            for (i, chunk) in chunker.chunk("parent", &s).iter().enumerate() {
                prop_assert_eq!(chunk.ordinal, i);
                let expected_id = format!("parent#{}", i);
                prop_assert_eq!(chunk.chunk_id.as_str(), expected_id.as_str());
                prop_assert_eq!(chunk.parent_id.as_str(), "parent");
            }
        }

        /// Invariant: empty input is the only input producing no chunks
        #[test]
        fn empty_only_for_empty(s in "[ -~]{1,500}") {
            let chunker = Chunker::default();
            prop_assert!(!chunker.chunk("p", &s).is_empty());
        }

        /// Invariant: custom configs keep reconstruction exact
        #[test]
        fn reconstruction_with_config(
            s in "[ -~]{0,1200}",
            target in 50usize..300,
            base_overlap in 5usize..40,
        ) {
            let chunker = Chunker::new(ChunkerConfig {
                target,
                min: 20,
                max: target * 2,
                base_overlap,
                adaptive: true,
            });
            let chunks = chunker.chunk("p", &s);
            prop_assert_eq!(reconstruct(&chunks), s.clone());
            for chunk in chunker.chunk("p", &s) {
                prop_assert!(chunk.content.chars().count() <= target * 2);
            }
        }
    }
}

// ============================================================================
// TOKENIZER TESTS
// ============================================================================

mod tokenizer_tests {
    use super::*;
    use stratum::keyword::tokenize;

    proptest! {
        /// Invariant: tokenization never panics
        #[test]
        fn never_panics(s in "\\PC{0,500}") {
            let _ = tokenize(&s);
        }

        /// Invariant: tokenization is deterministic
        #[test]
        fn deterministic(s in "\\PC{0,300}") {
            prop_assert_eq!(tokenize(&s), tokenize(&s));
        }

        /// Invariant: every token is lowercase and at least 2 chars
        #[test]
        fn token_contract(s in "\\PC{0,300}") {
            for token in tokenize(&s) {
                prop_assert!(token.chars().count() >= 2);
                prop_assert!(!token.chars().any(|c| c.is_uppercase()));
                prop_assert!(token.chars().all(|c| c.is_alphanumeric()));
            }
        }
    }
}

// ============================================================================
// FUSION TESTS
// ============================================================================

mod fusion_tests {
    use super::*;
    use stratum::fusion::{fuse, CandidateList, Channel};

    fn arbitrary_list() -> impl Strategy<Value = Vec<(String, f32)>> {
        prop::collection::vec(("[a-f]{1,4}", 0.0f32..100.0), 0..20)
    }

    proptest! {
        /// Invariant: fused scores stay in [0, 1]
        #[test]
        fn scores_bounded(entries in arbitrary_list()) {
            let list = CandidateList::new(Channel::Keyword, 0.3, entries);
            for candidate in fuse(&[list], None, 10) {
                prop_assert!(candidate.score >= 0.0 && candidate.score <= 1.0 + f32::EPSILON);
            }
        }

        /// Invariant: fusing a fused single list is stable (idempotence)
        #[test]
        fn idempotent(entries in arbitrary_list()) {
            let once = fuse(
                &[CandidateList::new(Channel::Keyword, 0.3, entries)],
                None,
                50,
            );
            let twice = fuse(
                &[CandidateList::new(
                    Channel::Keyword,
                    0.3,
                    once.iter().map(|c| (c.id.clone(), c.score)).collect(),
                )],
                None,
                50,
            );
            prop_assert_eq!(once.len(), twice.len());
            for (a, b) in once.iter().zip(twice.iter()) {
                prop_assert_eq!(&a.id, &b.id);
                prop_assert!((a.score - b.score).abs() < 1e-5);
            }
        }

        /// Invariant: output is deduplicated by id
        #[test]
        fn deduplicated(entries in arbitrary_list()) {
            let fused = fuse(
                &[CandidateList::new(Channel::Keyword, 0.3, entries)],
                None,
                50,
            );
            let mut ids: Vec<&str> = fused.iter().map(|c| c.id.as_str()).collect();
            ids.sort_unstable();
            let before = ids.len();
            ids.dedup();
            prop_assert_eq!(before, ids.len());
        }

        /// Invariant: identical inputs produce byte-identical orderings
        #[test]
        fn deterministic_ordering(
            keyword in arbitrary_list(),
            semantic in arbitrary_list(),
        ) {
            let build = || {
                vec![
                    CandidateList::new(Channel::Keyword, 0.3, keyword.clone()),
                    CandidateList::new(Channel::Semantic, 0.5, semantic.clone()),
                ]
            };
            let first = fuse(&build(), None, 25);
            for _ in 0..5 {
                let again = fuse(&build(), None, 25);
                prop_assert_eq!(first.len(), again.len());
                for (a, b) in first.iter().zip(again.iter()) {
                    prop_assert_eq!(&a.id, &b.id);
                    prop_assert_eq!(a.score.to_bits(), b.score.to_bits());
                }
            }
        }
    }
}

// ============================================================================
// IMMEDIATE TIER TESTS
// ============================================================================

mod immediate_tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use stratum::clock::ManualClock;
    use stratum::Clock;
    use stratum::config::ImmediateConfig;
    use stratum::tiers::ImmediateTier;
    use stratum::types::{estimate_tokens, ContextItem, ItemKind, Priority};

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Delete(usize),
        Advance(i64),
        List,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            "[a-z ]{1,120}".prop_map(Op::Add),
            (0usize..40).prop_map(Op::Delete),
            (1i64..500).prop_map(Op::Advance),
            Just(Op::List),
        ]
    }

    fn make_item(id: String, content: &str, clock: &ManualClock) -> ContextItem {
        ContextItem {
            id,
            content: content.to_string(),
            kind: ItemKind::Note,
            priority: Priority::Normal,
            metadata: HashMap::new(),
            created_at: clock.now(),
            last_accessed_at: clock.now(),
            access_count: 0,
            token_estimate: estimate_tokens(content).max(1),
            tier_hint: None,
        }
    }

    proptest! {
        /// Invariant: capacity and token cap hold after every operation
        #[test]
        fn bounds_always_hold(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let clock = Arc::new(ManualClock::at_epoch());
            let tier = ImmediateTier::new(
                ImmediateConfig {
                    capacity: 5,
                    ttl_seconds: 600,
                    token_cap: 64,
                },
                clock.clone(),
            );

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Add(content) => {
                        tier.add(make_item(format!("id{}", i), &content, &clock));
                    }
                    Op::Delete(n) => {
                        tier.delete(&format!("id{}", n));
                    }
                    Op::Advance(secs) => clock.advance_secs(secs),
                    Op::List => {
                        let _ = tier.list(None);
                    }
                }
                prop_assert!(tier.len() <= 5);
                prop_assert!(tier.token_sum() <= 64);
            }
        }

        /// Invariant: expired items are never returned
        #[test]
        fn ttl_never_leaks(advance in 0i64..2000) {
            let clock = Arc::new(ManualClock::at_epoch());
            let tier = ImmediateTier::new(
                ImmediateConfig {
                    capacity: 10,
                    ttl_seconds: 600,
                    token_cap: 4096,
                },
                clock.clone(),
            );
            tier.add(make_item("a".to_string(), "content words", &clock));
            clock.advance_secs(advance);

            for item in tier.list(None) {
                prop_assert!((clock.now() - item.created_at).num_seconds() <= 600);
            }
        }
    }
}

// ============================================================================
// SESSION TIER TESTS
// ============================================================================

mod session_tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use stratum::clock::ManualClock;
    use stratum::Clock;
    use stratum::config::SessionConfig;
    use stratum::tiers::SessionTier;
    use stratum::types::{estimate_tokens, ContextItem, ItemKind, Priority};

    fn make_item(id: String, priority: Priority, clock: &ManualClock) -> ContextItem {
        ContextItem {
            id,
            content: "session content".to_string(),
            kind: ItemKind::Note,
            priority,
            metadata: HashMap::new(),
            created_at: clock.now(),
            last_accessed_at: clock.now(),
            access_count: 0,
            token_estimate: estimate_tokens("session content"),
            tier_hint: None,
        }
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Critical),
            Just(Priority::High),
            Just(Priority::Normal),
            Just(Priority::Low),
            Just(Priority::Minimal),
        ]
    }

    proptest! {
        /// Invariant: per-conversation size never exceeds capacity
        #[test]
        fn capacity_bound_holds(
            priorities in prop::collection::vec(priority_strategy(), 1..40),
            convs in prop::collection::vec(0usize..3, 1..40),
        ) {
            let clock = Arc::new(ManualClock::at_epoch());
            let tier = SessionTier::new(
                SessionConfig {
                    capacity_per_conv: 4,
                    consolidation_threshold: 20,
                    half_life_seconds: 1800,
                },
                clock.clone(),
            );

            for (i, (priority, conv)) in priorities.iter().zip(convs.iter()).enumerate() {
                let conv_id = format!("c{}", conv);
                tier.add(make_item(format!("id{}", i), *priority, &clock), &conv_id);
                clock.advance_secs(1);
                for c in 0..3 {
                    let check_id = format!("c{}", c);
                    prop_assert!(tier.conversation_len(&check_id) <= 4);
                }
            }
        }

        /// Invariant: eviction removes the lowest-weight entry, so a
        /// critical item outlives minimal ones under pure insertion
        #[test]
        fn critical_survives_minimal_flood(flood in 5usize..20) {
            let clock = Arc::new(ManualClock::at_epoch());
            let tier = SessionTier::new(
                SessionConfig {
                    capacity_per_conv: 4,
                    consolidation_threshold: 20,
                    half_life_seconds: 1800,
                },
                clock.clone(),
            );

            tier.add(make_item("keep".to_string(), Priority::Critical, &clock), "c1");
            for i in 0..flood {
                tier.add(
                    make_item(format!("noise{}", i), Priority::Minimal, &clock),
                    "c1",
                );
            }

            prop_assert!(tier.get("keep").is_some());
        }
    }
}

// ============================================================================
// TYPE ROUND-TRIP TESTS
// ============================================================================

mod type_tests {
    use super::*;
    use stratum::types::{estimate_tokens, ItemKind, Priority, RetrievalStrategy};

    proptest! {
        /// Invariant: kind round-trips through its string form
        #[test]
        fn kind_roundtrip(kind in prop_oneof![
            Just(ItemKind::Preference), Just(ItemKind::Fact), Just(ItemKind::Task),
            Just(ItemKind::Note), Just(ItemKind::Conversation), Just(ItemKind::Document),
            Just(ItemKind::Code),
        ]) {
            let parsed: ItemKind = kind.as_str().parse().unwrap();
            prop_assert_eq!(kind, parsed);
        }

        /// Invariant: strategy round-trips through its string form
        #[test]
        fn strategy_roundtrip(strategy in prop_oneof![
            Just(RetrievalStrategy::Recency), Just(RetrievalStrategy::Relevance),
            Just(RetrievalStrategy::Hybrid), Just(RetrievalStrategy::Semantic),
            Just(RetrievalStrategy::Keyword), Just(RetrievalStrategy::Graph),
        ]) {
            let parsed: RetrievalStrategy = strategy.as_str().parse().unwrap();
            prop_assert_eq!(strategy, parsed);
        }

        /// Invariant: token estimate is ceil(chars/4) and positive for
        /// non-empty content
        #[test]
        fn token_estimate_formula(s in "\\PC{1,400}") {
            let chars = s.chars().count();
            let expected = ((chars + 3) / 4) as u32;
            prop_assert_eq!(estimate_tokens(&s), expected);
            prop_assert!(estimate_tokens(&s) >= 1);
        }

        /// Invariant: priority weights match the documented table
        #[test]
        fn priority_weight_table(priority in prop_oneof![
            Just(Priority::Critical), Just(Priority::High), Just(Priority::Normal),
            Just(Priority::Low), Just(Priority::Minimal),
        ]) {
            let expected = match priority {
                Priority::Critical => 1.5,
                Priority::High => 1.2,
                Priority::Normal => 1.0,
                Priority::Low => 0.7,
                Priority::Minimal => 0.4,
            };
            prop_assert_eq!(priority.weight(), expected);
        }
    }
}

// ============================================================================
// KEYWORD INDEX TESTS
// ============================================================================

mod keyword_tests {
    use super::*;
    use stratum::config::KeywordConfig;
    use stratum::keyword::{tokenize, KeywordIndex};

    proptest! {
        /// Invariant: every posting's term appears in the tokenized content
        /// of its document (searching any token of a doc finds the doc)
        #[test]
        fn postings_match_content(texts in prop::collection::vec("[a-z ]{5,60}", 1..8)) {
            let mut index = KeywordIndex::new(KeywordConfig::default());
            for (i, text) in texts.iter().enumerate() {
                index.index(&format!("d{}", i), text, None);
            }

            for (i, text) in texts.iter().enumerate() {
                let doc_id = format!("d{}", i);
                for token in tokenize(text) {
                    let hits = index.search(&token, usize::MAX, None);
                    prop_assert!(
                        hits.iter().any(|(id, _)| *id == doc_id),
                        "token {:?} of {} not found", token, doc_id
                    );
                }
            }
        }

        /// Invariant: removal is complete; no posting survives
        #[test]
        fn remove_is_complete(texts in prop::collection::vec("[a-z ]{5,60}", 1..6)) {
            let mut index = KeywordIndex::new(KeywordConfig::default());
            for (i, text) in texts.iter().enumerate() {
                index.index(&format!("d{}", i), text, None);
            }
            for i in 0..texts.len() {
                index.remove(&format!("d{}", i));
            }

            prop_assert_eq!(index.doc_count(), 0);
            for text in &texts {
                for token in tokenize(text) {
                    prop_assert!(index.search(&token, 10, None).is_empty());
                }
            }
        }

        /// Invariant: repeated searches return identical orderings
        #[test]
        fn search_deterministic(
            texts in prop::collection::vec("[a-d ]{5,40}", 2..8),
            query in "[a-d ]{2,20}",
        ) {
            let mut index = KeywordIndex::new(KeywordConfig::default());
            for (i, text) in texts.iter().enumerate() {
                index.index(&format!("d{}", i), text, None);
            }

            let first = index.search(&query, 20, None);
            for _ in 0..5 {
                prop_assert_eq!(index.search(&query, 20, None).clone(), first.clone());
            }
        }
    }
}
