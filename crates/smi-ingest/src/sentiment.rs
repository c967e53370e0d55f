//! Per-comment symbol sentiment: sentence segmentation, noun-phrase
//! candidates, lexicon polarity, and the per-symbol running mean.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use smi_core::{Comment, Mention, SymbolSet};

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

/// Largest absolute valence in the lexicon; polarity normalizes against it.
const MAX_VALENCE: f64 = 3.0;

/// Lexicon-based sentence polarity in `[-1.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_valence(&self, word: &str) -> i32 {
        *LEXICON.get(word).unwrap_or(&0)
    }

    /// Scores one sentence. A negator within the three preceding tokens
    /// inverts a word's valence. Sentences with no lexicon words score 0.
    pub fn sentence_polarity(&self, sentence: &str) -> f64 {
        let tokens: Vec<String> = tokenize(sentence).collect();
        let mut sum = 0i32;
        let mut scored = 0usize;

        for i in 0..tokens.len() {
            let base = self.word_valence(&tokens[i]);
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(&tokens[i - k]));
            sum += if negated { -base } else { base };
            scored += 1;
        }

        if scored == 0 {
            return 0.0;
        }
        (f64::from(sum) / (MAX_VALENCE * scored as f64)).clamp(-1.0, 1.0)
    }
}

/// Commutative running mean: `new = (old * n + x) / (n + 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    count: u32,
    mean: f64,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        let n = f64::from(self.count);
        self.mean = (self.mean * n + value) / (n + 1.0);
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Derives the Mention rows for one comment: every sentence-level match of
/// a tracked symbol feeds that symbol's running mean of sentence polarity.
/// One row per symbol actually mentioned, carrying the final mean.
pub fn comment_mentions(
    comment: &Comment,
    symbols: &SymbolSet,
    analyzer: &SentimentAnalyzer,
) -> Vec<Mention> {
    let mut means: HashMap<String, RunningMean> = HashMap::new();

    for sentence in split_sentences(&comment.body) {
        let matched: Vec<String> = noun_phrases(sentence)
            .into_iter()
            .filter(|phrase| symbols.contains(phrase))
            .collect();
        if matched.is_empty() {
            continue;
        }
        let polarity = analyzer.sentence_polarity(sentence);
        for symbol in matched {
            means.entry(symbol).or_default().push(polarity);
        }
    }

    let mut mentions: Vec<Mention> = means
        .into_iter()
        .map(|(symbol, mean)| Mention {
            symbol,
            comment_id: comment.id.clone(),
            sentiment: mean.mean(),
        })
        .collect();
    mentions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    mentions
}

pub fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Candidate noun phrases: content tokens with function words stripped,
/// upper-cased for the symbol-set lookup.
pub fn noun_phrases(sentence: &str) -> Vec<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| t.chars().any(|c| c.is_alphabetic()))
        .filter(|t| !is_stopword(&t.to_ascii_lowercase()))
        .map(|t| t.to_ascii_uppercase())
        .collect()
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

fn is_negator(token: &str) -> bool {
    matches!(
        token,
        "not"
            | "no"
            | "never"
            | "isnt"
            | "wasnt"
            | "arent"
            | "wont"
            | "cant"
            | "cannot"
            | "dont"
            | "didnt"
            | "doesnt"
            | "without"
    )
}

fn is_stopword(token: &str) -> bool {
    const STOPWORDS: &[&str] = &[
        "a", "about", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at", "be",
        "been", "before", "being", "between", "both", "but", "by", "can", "could", "did", "do",
        "does", "down", "each", "else", "few", "for", "from", "had", "has", "have", "he", "her",
        "here", "him", "his", "i", "if", "im", "in", "into", "is", "it", "its", "ive", "just",
        "may", "me", "might", "more", "most", "must", "my", "nor", "now", "of", "off", "on",
        "once", "only", "or", "other", "our", "out", "over", "own", "same", "shall", "she",
        "should", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there",
        "these", "they", "this", "those", "to", "too", "under", "up", "very", "was", "we", "were",
        "what", "when", "which", "while", "who", "whom", "will", "with", "would", "you", "your",
    ];
    STOPWORDS.contains(&token)
}
