//! Similarity between a catalog phrase and a transcript
//!
//! The score blends a character-level sequence ratio with word overlap so
//! that a phrase embedded in a longer sentence still scores well.

use crate::normalize::normalize;
use std::collections::HashSet;

/// Weight of the character sequence ratio in the combined score
pub const SEQUENCE_WEIGHT: f64 = 0.7;

/// Weight of the word overlap in the combined score
pub const TOKEN_WEIGHT: f64 = 0.3;

/// Score `text` against `candidate`, both raw; result is in [0, 1]
pub fn score(candidate: &str, text: &str) -> f64 {
    score_normalized(&normalize(candidate), &normalize(text))
}

/// Score two already-normalized strings
pub fn score_normalized(candidate: &str, text: &str) -> f64 {
    // Equal forms are a perfect match, including two empty strings
    if candidate == text {
        return 1.0;
    }

    SEQUENCE_WEIGHT * sequence_ratio(candidate, text) + TOKEN_WEIGHT * token_overlap(candidate, text)
}

/// `2 * LCS / (len_a + len_b)` over chars; two empty strings score 1.0
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    2.0 * longest_common_subsequence(&a, &b) as f64 / total as f64
}

/// Fraction of the candidate's distinct words present in `text`
pub fn token_overlap(candidate: &str, text: &str) -> f64 {
    let candidate_tokens: HashSet<&str> = candidate.split_whitespace().collect();
    let text_tokens: HashSet<&str> = text.split_whitespace().collect();

    let shared = candidate_tokens.intersection(&text_tokens).count();
    shared as f64 / candidate_tokens.len().max(1) as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // Two rolling rows over the shorter string
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut previous = vec![0usize; short.len() + 1];
    let mut current = vec![0usize; short.len() + 1];

    for &lc in long {
        for (j, &sc) in short.iter().enumerate() {
            current[j + 1] = if lc == sc {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[short.len()]
}
