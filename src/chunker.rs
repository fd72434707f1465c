//! Adaptive text chunker
//!
//! Splits long content into overlapping chunks honoring sentence and
//! paragraph boundaries. Overlap scales with sentence density so dense
//! prose carries more shared context between adjacent chunks.
//!
//! Chunk boundaries are computed as char offsets into the original text,
//! which keeps the reconstruction property exact: the first chunk plus the
//! non-overlapping suffix of every later chunk yields the original input.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::config::ChunkerConfig;
use crate::types::Chunk;

/// Words whose trailing period does not close a sentence
static ABBREVIATIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "fig",
        "no", "al",
    ]
    .into_iter()
    .collect()
});

/// Sentence-aware chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into ordered chunks. Empty input yields an empty
    /// sequence; this never fails.
    pub fn chunk(&self, parent_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        if total == 0 {
            return Vec::new();
        }

        if total <= self.config.target {
            return vec![Chunk {
                chunk_id: format!("{}#0", parent_id),
                parent_id: parent_id.to_string(),
                content: text.to_string(),
                ordinal: 0,
                overlap_prev_chars: 0,
            }];
        }

        let boundaries = sentence_boundaries(&chars);
        let spans = self.pack(&chars, &boundaries);

        spans
            .iter()
            .enumerate()
            .map(|(ordinal, &(start, end))| {
                let overlap_prev_chars = if ordinal == 0 {
                    0
                } else {
                    spans[ordinal - 1].1 - start
                };
                Chunk {
                    chunk_id: format!("{}#{}", parent_id, ordinal),
                    parent_id: parent_id.to_string(),
                    content: chars[start..end].iter().collect(),
                    ordinal,
                    overlap_prev_chars,
                }
            })
            .collect()
    }

    /// Greedy sentence packing into `(start, end)` char spans
    fn pack(&self, chars: &[char], boundaries: &[usize]) -> Vec<(usize, usize)> {
        let total = chars.len();
        let target = self.config.target;
        let min = self.config.min;
        let max = self.config.max;

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut start = 0usize;

        while start < total {
            let mut end = start;
            let mut sentences = 0usize;

            for &sent_end in boundaries.iter().filter(|&&b| b > start) {
                let candidate_len = sent_end - start;

                if sentences == 0 {
                    if candidate_len > max {
                        end = split_on_whitespace(chars, start, start + max);
                        sentences = 1;
                        break;
                    }
                    end = sent_end;
                    sentences = 1;
                } else {
                    let current_len = end - start;
                    if candidate_len > max {
                        break;
                    }
                    if candidate_len > target && current_len >= min {
                        break;
                    }
                    end = sent_end;
                    sentences += 1;
                }

                if end - start >= target {
                    break;
                }
            }

            if sentences == 0 {
                end = (start + target).min(total);
            }

            spans.push((start, end));
            if end >= total {
                break;
            }

            let overlap = self.overlap_for(sentences).min(end - start - 1);
            let window_start = end - overlap;

            // Align the seed to the first sentence boundary inside the
            // overlap window, when one exists.
            let next_start = boundaries
                .iter()
                .copied()
                .find(|&b| b >= window_start && b < end)
                .unwrap_or(window_start);

            start = if next_start > start { next_start } else { end };
        }

        self.absorb_short_tail(&mut spans, total);
        spans
    }

    /// Overlap length for the next chunk, from the sentence count of the
    /// current one
    fn overlap_for(&self, sentences: usize) -> usize {
        let base = self.config.base_overlap;
        let scaled = if !self.config.adaptive {
            base
        } else if sentences <= 2 {
            base
        } else if sentences <= 5 {
            2 * base
        } else {
            3 * base
        };
        scaled.min(self.config.max_overlap())
    }

    /// A tail shorter than `min` is merged into its predecessor when the
    /// merged span stays within `max`; otherwise the tail grows backwards
    /// into the predecessor up to the overlap cap.
    fn absorb_short_tail(&self, spans: &mut Vec<(usize, usize)>, total: usize) {
        if spans.len() < 2 {
            return;
        }
        let (last_start, last_end) = spans[spans.len() - 1];
        if last_end - last_start >= self.config.min || last_end != total {
            return;
        }

        let (prev_start, prev_end) = spans[spans.len() - 2];
        if last_end - prev_start <= self.config.max {
            spans.pop();
            let idx = spans.len() - 1;
            spans[idx] = (prev_start, last_end);
            return;
        }

        let needed = self.config.min - (last_end - last_start);
        let grown_start = last_start
            .saturating_sub(needed)
            .max(prev_end.saturating_sub(self.config.max_overlap()))
            .max(prev_start + 1);
        let idx = spans.len() - 1;
        spans[idx] = (grown_start, last_end);
    }
}

/// Exclusive char offsets of sentence ends, trailing whitespace attached to
/// the closing sentence. The final offset is always `chars.len()`.
fn sentence_boundaries(chars: &[char]) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let total = chars.len();
    let mut i = 0;

    while i < total {
        let c = chars[i];

        if matches!(c, '.' | '!' | '?' | '。' | '！' | '？') {
            let fullwidth = matches!(c, '。' | '！' | '？');
            let mut j = i;
            while j < total && matches!(chars[j], '.' | '!' | '?' | '。' | '！' | '？') {
                j += 1;
            }
            while j < total && matches!(chars[j], '"' | '\'' | ')' | ']' | '」' | '』') {
                j += 1;
            }

            // Fullwidth terminators close a sentence without trailing space
            let closes = fullwidth || j >= total || chars[j].is_whitespace();
            if closes && !is_abbreviation(chars, i) {
                while j < total && chars[j].is_whitespace() {
                    j += 1;
                }
                boundaries.push(j);
            }
            i = j.max(i + 1);
            continue;
        }

        // Blank line closes a sentence even without terminal punctuation
        if c == '\n' && i + 1 < total && chars[i + 1] == '\n' {
            let mut j = i;
            while j < total && chars[j].is_whitespace() {
                j += 1;
            }
            if boundaries.last() != Some(&j) {
                boundaries.push(j);
            }
            i = j;
            continue;
        }

        i += 1;
    }

    if boundaries.last() != Some(&total) {
        boundaries.push(total);
    }
    boundaries
}

/// Check whether the word ending at the punctuation position `dot` is a
/// known abbreviation
fn is_abbreviation(chars: &[char], dot: usize) -> bool {
    let mut start = dot;
    while start > 0 {
        let prev = chars[start - 1];
        if prev.is_alphanumeric() || prev == '.' {
            start -= 1;
        } else {
            break;
        }
    }
    if start == dot {
        return false;
    }

    let word: String = chars[start..dot]
        .iter()
        .collect::<String>()
        .trim_matches('.')
        .to_lowercase();
    ABBREVIATIONS.contains(word.as_str())
}

/// Largest end position in `(start, hard_end]` that falls just after a
/// whitespace char; `hard_end` when the span has no whitespace
fn split_on_whitespace(chars: &[char], start: usize, hard_end: usize) -> usize {
    let hard_end = hard_end.min(chars.len());
    for p in (start + 1..hard_end).rev() {
        if chars[p].is_whitespace() {
            return p + 1;
        }
    }
    hard_end
}
