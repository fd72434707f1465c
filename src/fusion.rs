//! Hybrid fusion of scored candidate lists
//!
//! Takes independently scored candidate lists (keyword, semantic, graph,
//! plus the in-memory tier scans), min-max normalizes each onto [0, 1],
//! redistributes the weights of absent channels, and merges into a single
//! deterministic ranking.

use std::collections::HashMap;

use crate::types::ComponentScores;

/// Which retrieval path produced a candidate list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Keyword,
    Semantic,
    Graph,
    Immediate,
    Session,
}

/// One scored candidate list entering fusion
#[derive(Debug, Clone)]
pub struct CandidateList {
    pub channel: Channel,
    /// Raw channel weight; absent channels redistribute proportionally
    pub weight: f32,
    /// `(id, raw_score)` sorted descending by the producer
    pub entries: Vec<(String, f32)>,
}

impl CandidateList {
    pub fn new(channel: Channel, weight: f32, entries: Vec<(String, f32)>) -> Self {
        Self {
            channel,
            weight,
            entries,
        }
    }
}

/// A fused candidate with per-channel diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: String,
    pub score: f32,
    pub components: ComponentScores,
    /// How many channels contributed
    pub channels: usize,
}

/// Fuse candidate lists into one ranking.
///
/// Steps: per-list min-max normalization (lists with one entry or uniform
/// scores normalize to 1.0), proportional weight redistribution over the
/// non-empty lists, weighted sum per id, `min_score` filter, deterministic
/// sort (score desc, contributing-channel count desc, id asc), truncation
/// to `2 * max_results` to leave headroom for the token budget downstream.
pub fn fuse(
    lists: &[CandidateList],
    min_score: Option<f32>,
    max_results: usize,
) -> Vec<FusedCandidate> {
    let active: Vec<&CandidateList> = lists.iter().filter(|l| !l.entries.is_empty()).collect();
    if active.is_empty() {
        return Vec::new();
    }

    let weight_sum: f32 = active.iter().map(|l| l.weight).sum();
    if weight_sum <= 0.0 {
        return Vec::new();
    }

    let mut fused: HashMap<String, FusedCandidate> = HashMap::new();

    for list in &active {
        let weight = list.weight / weight_sum;
        let normalized = normalize(&list.entries);

        for (id, score) in normalized {
            let entry = fused.entry(id.clone()).or_insert_with(|| FusedCandidate {
                id,
                score: 0.0,
                components: ComponentScores::default(),
                channels: 0,
            });
            entry.score += weight * score;
            entry.channels += 1;
            let slot = match list.channel {
                Channel::Keyword => &mut entry.components.keyword,
                Channel::Semantic => &mut entry.components.semantic,
                Channel::Graph => &mut entry.components.graph,
                Channel::Immediate | Channel::Session => &mut entry.components.recency,
            };
            *slot = Some(slot.map_or(score, |prev: f32| prev.max(score)));
        }
    }

    let mut ranked: Vec<FusedCandidate> = fused.into_values().collect();

    if let Some(min_score) = min_score {
        ranked.retain(|c| c.score >= min_score);
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.channels.cmp(&a.channels))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(max_results.saturating_mul(2));
    ranked
}

/// Min-max normalize onto [0, 1], deduplicating ids within the list by
/// keeping the maximum raw score. Lists with a single distinct id or all
/// equal scores normalize to 1.0.
fn normalize(entries: &[(String, f32)]) -> Vec<(String, f32)> {
    let mut deduped: HashMap<&str, f32> = HashMap::new();
    for (id, score) in entries {
        deduped
            .entry(id.as_str())
            .and_modify(|s| *s = s.max(*score))
            .or_insert(*score);
    }

    let min = deduped.values().copied().fold(f32::INFINITY, f32::min);
    let max = deduped.values().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    let uniform = deduped.len() <= 1 || range <= f32::EPSILON;

    deduped
        .into_iter()
        .map(|(id, score)| {
            let normalized = if uniform { 1.0 } else { (score - min) / range };
            (id.to_string(), normalized)
        })
        .collect()
}
