//! Anchor matching: place a model-quoted anchor text inside a document.
//!
//! Exact substring first. Otherwise every anchor-length window of the
//! document is scored by normalized Levenshtein similarity; windows are split
//! into contiguous chunks scored in parallel on the rayon pool, and the best
//! window overall wins if it clears the threshold. Positions and window sizes
//! are in Unicode code points.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use sha1::{Digest, Sha1};

use super::types::AnchorMatch;
use crate::toolkit::handler::panic_message;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.65;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Exact-then-fuzzy anchor matcher.
#[derive(Debug, Clone, Copy)]
pub struct AnchorMatcher {
    threshold: f64,
    chunk_size: usize,
}

impl Default for AnchorMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_CHUNK_SIZE)
    }
}

impl AnchorMatcher {
    /// `chunk_size` is the number of candidate windows per parallel task.
    pub fn new(threshold: f64, chunk_size: usize) -> Self {
        Self {
            threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Best placement of `anchor` in `content`, or `None` when the anchor is
    /// empty, longer than the document, or no window reaches the threshold.
    pub fn find_best_match(&self, content: &str, anchor: &str) -> Option<AnchorMatch> {
        if anchor.is_empty() {
            return None;
        }

        if let Some(byte_idx) = content.find(anchor) {
            return Some(AnchorMatch {
                position: content[..byte_idx].chars().count(),
                matched_text: anchor.to_string(),
                similarity: 1.0,
            });
        }

        let anchor_len = anchor.chars().count();
        // Byte offset of every code point, plus the end of the string.
        let boundaries: Vec<usize> = content
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(content.len()))
            .collect();
        let content_len = boundaries.len() - 1;
        if anchor_len > content_len {
            return None;
        }

        let window_count = content_len - anchor_len + 1;
        let window = |start: usize| &content[boundaries[start]..boundaries[start + anchor_len]];

        let best = best_across_chunks(window_count, self.chunk_size, |range| {
            let mut best: Option<(usize, f64)> = None;
            for start in range {
                let score = strsim::normalized_levenshtein(window(start), anchor);
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((start, score));
                }
            }
            best
        });

        match best {
            Some((start, similarity)) if similarity >= self.threshold => {
                tracing::debug!(position = start, similarity, "fuzzy anchor match");
                Some(AnchorMatch {
                    position: start,
                    matched_text: window(start).to_string(),
                    similarity,
                })
            }
            Some((_, similarity)) => {
                tracing::debug!(similarity, threshold = self.threshold, "best fuzzy window below threshold");
                None
            }
            None => None,
        }
    }
}

/// Score `window_count` windows in parallel chunks of `chunk_size` and reduce
/// to the single best `(start, score)`.
///
/// The earliest window wins ties. A chunk that panics contributes nothing and
/// the remaining chunks still count.
fn best_across_chunks<F>(window_count: usize, chunk_size: usize, score_chunk: F) -> Option<(usize, f64)>
where
    F: Fn(std::ops::Range<usize>) -> Option<(usize, f64)> + Sync,
{
    let chunk_count = window_count.div_ceil(chunk_size);
    let per_chunk: Vec<Option<(usize, f64)>> = (0..chunk_count)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * chunk_size;
            let end = (start + chunk_size).min(window_count);
            match catch_unwind(AssertUnwindSafe(|| score_chunk(start..end))) {
                Ok(best) => best,
                Err(payload) => {
                    tracing::error!(
                        chunk,
                        panic = %panic_message(payload.as_ref()),
                        "fuzzy match chunk panicked"
                    );
                    None
                }
            }
        })
        .collect();

    // Collected in chunk order, so a strict comparison keeps the first.
    per_chunk.into_iter().flatten().fold(None, |best, candidate| match best {
        Some((_, b)) if candidate.1 <= b => best,
        _ => Some(candidate),
    })
}

/// Content hash of a document as the editor computes it:
/// `sha1("blob {code point count}\0{content}")` in lowercase hex.
pub fn doc_sha1(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.chars().count()).as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
