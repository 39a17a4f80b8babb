//! Phrase catalog and best-match search

use crate::normalize::normalize;
use crate::scorer::score_normalized;
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Phrase catalog is empty")]
    Empty,

    #[error("Phrase {index} is empty after normalization: {phrase:?}")]
    EmptyPhrase { index: usize, phrase: String },
}

/// Ten canonical fraud-indicator phrases
pub const DEFAULT_PHRASES: [&str; 10] = [
    "i lost my card",
    "i forgot my password",
    "send money now",
    "authorize a transfer",
    "urgent payment required",
    "confirm your code",
    "give me your account",
    "transfer all funds",
    "wire money now",
    "cancel the block",
];

#[derive(Debug, Clone)]
struct CatalogEntry {
    phrase: String,
    normalized: String,
}

/// Ordered, immutable list of phrases with their normalized forms
#[derive(Debug, Clone)]
pub struct PhraseCatalog {
    entries: Vec<CatalogEntry>,
}

impl PhraseCatalog {
    pub fn new<I, S>(phrases: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for (index, phrase) in phrases.into_iter().enumerate() {
            let phrase = phrase.into();
            let normalized = normalize(&phrase);

            if normalized.is_empty() {
                return Err(CatalogError::EmptyPhrase { index, phrase });
            }

            if !seen.insert(normalized.clone()) {
                warn!("Duplicate catalog phrase {:?}, it can never win a match", phrase);
            }

            entries.push(CatalogEntry { phrase, normalized });
        }

        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self { entries })
    }

    /// Catalog holding [`DEFAULT_PHRASES`]
    pub fn default_phrases() -> Self {
        Self {
            entries: DEFAULT_PHRASES
                .iter()
                .map(|p| CatalogEntry {
                    phrase: p.to_string(),
                    normalized: normalize(p),
                })
                .collect(),
        }
    }

    /// Catalog that never matches; [`PhraseCatalog::new`] refuses to build one
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, phrase: &str) -> bool {
        self.entries.iter().any(|e| e.phrase == phrase)
    }

    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.phrase.as_str())
    }

    /// Highest-scoring phrase for `text`
    ///
    /// Ties keep the earlier catalog entry. No threshold is applied here.
    pub fn best_match(&self, text: &str) -> MatchResult {
        let text = normalize(text);
        let mut best = MatchResult::none();

        for entry in &self.entries {
            let score = score_normalized(&entry.normalized, &text);
            if score > best.score {
                best = MatchResult {
                    matched_phrase: Some(entry.phrase.clone()),
                    score,
                };
            }
        }

        best
    }
}

/// Outcome of one catalog search
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched_phrase: Option<String>,
    pub score: f64,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            matched_phrase: None,
            score: 0.0,
        }
    }

    /// The matched phrase if the score reaches `threshold`
    pub fn accepted(&self, threshold: f64) -> Option<&str> {
        match &self.matched_phrase {
            Some(phrase) if self.score >= threshold => Some(phrase),
            _ => None,
        }
    }
}
