//! Content Segmentation
//!
//! Fits oversized content into a model's input budget by splitting it into
//! overlapping chunks, and stitches per-chunk outputs back together.
//!
//! ## Protocol
//!
//! 1. `segment`: no-op when the estimate is within 90% of the budget,
//!    otherwise char-bounded chunks that prefer to end on a sentence break
//! 2. Each chunk records the text it shares with the next one (`overlap_with_next`)
//! 3. `process_segments`: one call per chunk in index order; a failed chunk
//!    becomes a visible placeholder instead of aborting the request
//! 4. `integrate`: concatenate outputs, dropping a repeated overlap prefix

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use crate::ai::tokenizer::TokenEstimator;
use crate::config::SegmentationConfig;
use crate::constants::{segmentation as seg_constants, tokens};
use crate::types::{LensError, Result};

/// How chunk boundaries are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStrategy {
    /// Prefer the last sentence break inside each chunk
    #[default]
    Sentence,
    /// Hard cuts at the chunk size
    Fixed,
}

/// A bounded slice of one oversized input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSegment {
    pub id: String,
    pub content: String,
    pub index: usize,
    pub total_segments: usize,
    pub is_last_segment: bool,
    /// Trailing text repeated at the start of the next segment
    pub overlap_with_next: Option<String>,
}

/// Per-request segmentation parameters
#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    pub max_input_tokens: usize,
    pub strategy: SegmentStrategy,
    pub max_segments: usize,
    pub preserve_context: bool,
}

/// Outcome of running every segment through a model call
#[derive(Debug)]
pub struct SegmentRun<T> {
    /// One entry per segment, placeholders included, in index order
    pub outputs: Vec<String>,
    /// Payloads of the successful calls
    pub successes: Vec<T>,
    pub failed: usize,
    pub last_error: Option<LensError>,
}

impl<T> SegmentRun<T> {
    pub fn all_failed(&self) -> bool {
        self.successes.is_empty() && self.failed > 0
    }
}

/// Placeholder substituted for a segment whose call failed
pub fn segment_failure_placeholder(index: usize, reason: &str) -> String {
    format!("segment {} failed: {}", index + 1, reason)
}

/// Splits and reintegrates content
#[derive(Debug, Clone)]
pub struct ContentSegmenter {
    chunk_size: usize,
    overlap: usize,
    estimator: TokenEstimator,
}

impl Default for ContentSegmenter {
    fn default() -> Self {
        Self::new(seg_constants::DEFAULT_CHUNK_SIZE, seg_constants::DEFAULT_OVERLAP)
    }
}

impl ContentSegmenter {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(2);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
            estimator: TokenEstimator::new(),
        }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self::new(config.chunk_size, config.overlap)
    }

    /// Whether `content` exceeds 90% of the input budget
    pub fn needs_segmentation(&self, content: &str, max_input_tokens: usize) -> bool {
        self.estimator.estimate(content) as f64
            > max_input_tokens as f64 * seg_constants::SAFETY_RATIO
    }

    /// Split `content` into ordered segments.
    ///
    /// Content within budget comes back as a single identical segment.
    pub fn segment(&self, content: &str, options: &SegmentOptions) -> Vec<ContentSegment> {
        let group = uuid::Uuid::new_v4().simple().to_string();

        if !self.needs_segmentation(content, options.max_input_tokens) {
            return vec![ContentSegment {
                id: format!("{}-0", group),
                content: content.to_string(),
                index: 0,
                total_segments: 1,
                is_last_segment: true,
                overlap_with_next: None,
            }];
        }

        let chars: Vec<char> = content.chars().collect();
        let max_segments = options.max_segments.max(1);
        let (chunk, overlap) = self.plan(chars.len(), options.max_input_tokens, max_segments);
        let bounds = split_bounds(&chars, chunk, overlap, max_segments, options.strategy);
        let total = bounds.len();

        debug!(
            chars = chars.len(),
            chunk,
            overlap,
            segments = total,
            "Segmented oversized content"
        );

        bounds
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| {
                let overlap_with_next = bounds.get(index + 1).map(|&(next_start, _)| {
                    chars[next_start..end].iter().collect::<String>()
                });
                ContentSegment {
                    id: format!("{}-{}", group, index),
                    content: chars[start..end].iter().collect(),
                    index,
                    total_segments: total,
                    is_last_segment: index + 1 == total,
                    overlap_with_next: overlap_with_next.filter(|o| !o.is_empty()),
                }
            })
            .collect()
    }

    /// Chunk size and overlap for one call.
    ///
    /// The chunk is shrunk so a chunk of pure CJK still fits the budget, then
    /// grown again if honoring it would need more than `max_segments` chunks.
    fn plan(&self, len: usize, max_input_tokens: usize, max_segments: usize) -> (usize, usize) {
        let budget_chars =
            (max_input_tokens as f64 * seg_constants::SAFETY_RATIO / tokens::CJK_WEIGHT) as usize;
        let mut chunk = self.chunk_size.min(budget_chars).max(2);
        let mut overlap = self.overlap.min(chunk / 2);

        let needed = segments_needed(len, chunk, overlap);
        if needed > max_segments {
            let grown = (len + (max_segments - 1) * overlap).div_ceil(max_segments);
            warn!(
                needed,
                max_segments,
                chunk,
                grown,
                "Segment cap reached, enlarging chunks past the input budget"
            );
            chunk = grown.max(chunk);
            overlap = overlap.min(chunk / 2);
        }
        (chunk, overlap)
    }

    /// Merge per-segment outputs in index order.
    ///
    /// A single output is returned unchanged. When an output starts with the
    /// previous segment's overlap it is appended without that prefix (the two
    /// pieces are contiguous); otherwise outputs are separated by a blank line.
    pub fn integrate(
        &self,
        segments: &[ContentSegment],
        outputs: &[String],
        preserve_context: bool,
    ) -> String {
        match outputs {
            [] => return String::new(),
            [only] => return only.clone(),
            _ => {}
        }

        let mut merged = outputs[0].clone();
        for (i, output) in outputs.iter().enumerate().skip(1) {
            let overlap = segments
                .get(i - 1)
                .and_then(|s| s.overlap_with_next.as_deref())
                .filter(|o| !o.is_empty());
            match overlap.and_then(|o| output.strip_prefix(o)) {
                Some(rest) => merged.push_str(rest),
                None => {
                    merged.push_str("\n\n");
                    merged.push_str(output);
                }
            }
        }

        if preserve_context {
            merged.push_str(&synthesis_instruction(outputs.len()));
        }
        merged
    }
}

/// Run `call` for every segment in index order, substituting placeholders for failures.
pub async fn process_segments<T, F, Fut>(segments: &[ContentSegment], mut call: F) -> SegmentRun<T>
where
    F: FnMut(&ContentSegment) -> Fut,
    Fut: Future<Output = Result<(String, T)>>,
{
    let mut run = SegmentRun {
        outputs: Vec::with_capacity(segments.len()),
        successes: Vec::new(),
        failed: 0,
        last_error: None,
    };

    for segment in segments {
        match call(segment).await {
            Ok((text, payload)) => {
                run.outputs.push(text);
                run.successes.push(payload);
            }
            Err(err) => {
                warn!(
                    segment = segment.index + 1,
                    total = segment.total_segments,
                    error = %err,
                    "Segment call failed, substituting placeholder"
                );
                run.outputs
                    .push(segment_failure_placeholder(segment.index, &err.to_string()));
                run.failed += 1;
                run.last_error = Some(err);
            }
        }
    }
    run
}

fn synthesis_instruction(segment_count: usize) -> String {
    format!(
        "\n\n---\n[Cross-segment synthesis] The analysis above was produced from {} \
         separate segments of one input. Reconcile overlapping or conflicting points \
         and state one coherent overall conclusion.",
        segment_count
    )
}

fn segments_needed(len: usize, chunk: usize, overlap: usize) -> usize {
    if len <= chunk {
        1
    } else {
        1 + (len - chunk).div_ceil(chunk - overlap)
    }
}

/// `[start, end)` char ranges; each range after the first begins `overlap`
/// chars before the previous one ends.
fn split_bounds(
    chars: &[char],
    chunk: usize,
    overlap: usize,
    max_segments: usize,
    strategy: SegmentStrategy,
) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut bounds = Vec::new();
    let mut start = 0;

    loop {
        let mut end = if bounds.len() + 1 >= max_segments {
            len
        } else {
            (start + chunk).min(len)
        };

        if end < len
            && strategy == SegmentStrategy::Sentence
            && let Some(brk) = find_sentence_break(chars, start, end, overlap)
        {
            end = brk;
        }

        bounds.push((start, end));
        if end >= len {
            break;
        }
        start = end - overlap;
    }
    bounds
}

/// Exclusive end index just past the last usable sentence terminator.
///
/// A break is usable when it leaves at least `MIN_TAIL_CHARS` of the chunk
/// after it, keeps the chunk longer than the overlap, and the terminator is
/// not directly followed by a lowercase Latin letter or a digit.
fn find_sentence_break(chars: &[char], start: usize, end: usize, overlap: usize) -> Option<usize> {
    let latest = end.checked_sub(seg_constants::MIN_TAIL_CHARS)?;
    let earliest = start + overlap + 1;
    if latest < earliest {
        return None;
    }

    (earliest..=latest).rev().find(|&brk| {
        let terminal = chars[brk - 1];
        let next = chars.get(brk).copied();
        seg_constants::SENTENCE_TERMINALS.contains(&terminal)
            && !next.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    })
}
