//! # Sentiment Scoring
//! The scorer is an injected capability: pure, total over any UTF-8 text,
//! bounded to [-1, 1]. Empty or unscorable text yields 0.0. The pipeline's
//! correctness never depends on which scorer is plugged in, so tests use
//! deterministic stubs.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalization constant: raw lexicon sums map to (-1, 1) via
/// `x / sqrt(x^2 + ALPHA)`.
const ALPHA: f64 = 15.0;

/// Label thresholds on the [-1, 1] scale (45/55 on the 0..100 scale).
const LABEL_NEG_MAX: f64 = -0.1;
const LABEL_POS_MIN: f64 = 0.1;

pub trait SentimentScorer: Send + Sync {
    /// Score `text` in [-1, 1]; must not fail.
    fn score(&self, text: &str) -> f64;
}

/// Coarse classification of a score, used for finalized bucket rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Negative,
    Neutral,
    Positive,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score <= LABEL_NEG_MAX {
            Self::Negative
        } else if score >= LABEL_POS_MIN {
            Self::Positive
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
        }
    }
}

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

/// Bundled lexicon scorer with negation handling.
#[derive(Debug, Clone, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    /// Raw lexicon sum. Negation: a negator within the last 1..=3 tokens
    /// inverts the sign of the word's lexicon score.
    fn raw_score(&self, text: &str) -> i32 {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score: i32 = 0;

        for i in 0..tokens.len() {
            let base = self.word_score(tokens[i].as_str());
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            score += if negated { -base } else { base };
        }

        score
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let raw = self.raw_score(text) as f64;
        if raw == 0.0 {
            return 0.0;
        }
        raw / (raw * raw + ALPHA).sqrt()
    }
}

/// Alphanumeric tokens, lower-cased.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not" | "no" | "never" | "isn't" | "wasn't" | "aren't" | "won't" | "can't" | "cannot"
            | "without"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_neutral() {
        let s = LexiconScorer::new();
        assert_eq!(s.score(""), 0.0);
        assert_eq!(s.score("   \t\n"), 0.0);
    }

    #[test]
    fn unknown_tokens_are_neutral() {
        let s = LexiconScorer::new();
        assert_eq!(s.score("qwzx vbnm 12345"), 0.0);
    }

    #[test]
    fn scores_are_bounded() {
        let s = LexiconScorer::new();
        let hot = "moon moon moon moon moon rally rally bullish bullish surge";
        let cold = "crash crash dump dump scam rug bearish plunge loss fear";
        assert!(s.score(hot) > 0.0 && s.score(hot) < 1.0);
        assert!(s.score(cold) < 0.0 && s.score(cold) > -1.0);
    }

    #[test]
    fn negation_flips_sign() {
        let s = LexiconScorer::new();
        let pos = s.score("bullish");
        let neg = s.score("not bullish");
        assert!(pos > 0.0);
        assert!(neg < 0.0);
        assert!((pos + neg).abs() < 1e-9);
    }

    #[test]
    fn labels_follow_thresholds() {
        assert_eq!(SentimentLabel::from_score(-0.5), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_score(-0.1), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_score(0.0), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(0.1), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_score(0.7), SentimentLabel::Positive);
    }
}
