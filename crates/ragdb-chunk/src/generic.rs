//! Line-based fixed-budget splitting with overlap.

use ragdb_core::config::ChunkerConfig;

/// `ceil(words / 0.75)`.
pub fn estimate_tokens(text: &str) -> usize { tokens_for_words(text.split_whitespace().count()) }

fn tokens_for_words(words: usize) -> usize { (words * 4).div_ceil(3) }

/// Half-open line range relative to the slice that was split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Splits `lines` into spans of at most `max_tokens` (a single longer line
/// still forms its own span). Each span after the first starts
/// `overlap_ratio` of the previous span's tokens back, always making at
/// least one line of progress. A trailing span under `min_tokens` grows
/// backwards while it still fits. Consecutive spans never leave a gap.
pub fn split_lines(lines: &[&str], config: &ChunkerConfig) -> Vec<Span> {
    let words: Vec<usize> = lines.iter().map(|l| l.split_whitespace().count()).collect();
    let max_tokens = config.max_tokens.max(1);
    let n = words.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < n {
        let mut end = start;
        let mut span_words = 0;
        while end < n {
            let next = span_words + words[end];
            if end > start && tokens_for_words(next) > max_tokens {
                break;
            }
            span_words = next;
            end += 1;
        }
        spans.push(Span { start, end });
        if end >= n {
            break;
        }

        let overlap = (config.overlap_ratio.clamp(0.0, 0.99) * tokens_for_words(span_words) as f32).floor() as usize;
        let mut back = end;
        let mut overlap_words = 0;
        while back > start + 1 && tokens_for_words(overlap_words + words[back - 1]) <= overlap {
            overlap_words += words[back - 1];
            back -= 1;
        }
        start = back;
    }

    if spans.len() > 1 {
        if let Some(last) = spans.last_mut() {
            let mut total: usize = words[last.start..last.end].iter().sum();
            while last.start > 0
                && tokens_for_words(total) < config.min_tokens
                && tokens_for_words(total + words[last.start - 1]) <= max_tokens
            {
                last.start -= 1;
                total += words[last.start];
            }
        }
    }
    spans
}
