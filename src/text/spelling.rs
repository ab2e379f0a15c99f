// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Word-level spelling correction
//!
//! Norvig-style corrector over a word frequency dictionary: a known word is
//! kept, otherwise the most frequent known word at edit distance 1, then 2,
//! wins. Unknown words with no candidate are left unchanged.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use lru::LruCache;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::entities::is_placeholder;

const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// Tokens longer than this are never corrected
pub const MAX_CORRECTABLE_LEN: usize = 20;

/// Default size of the correction cache
pub const DEFAULT_CACHE_SIZE: usize = 4096;

/// Corrects whitespace-separated words
pub trait SpellCorrector: Send + Sync {
    /// Best correction for one token, punctuation kept in place
    fn correct_word(&self, word: &str) -> String;

    /// Correct every whitespace-separated token, rejoined with single spaces
    fn correct_text(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|token| self.correct_word(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lower-cased word frequencies
#[derive(Debug, Clone, Default)]
pub struct FrequencyDictionary {
    counts: HashMap<String, u64>,
}

impl FrequencyDictionary {
    pub fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut dict = Self::default();
        for (word, count) in counts {
            *dict.counts.entry(word.as_ref().to_lowercase()).or_insert(0) += count;
        }
        dict
    }

    /// Load a dictionary file
    ///
    /// `*.json.gz` and `*.json` hold a `{"word": count}` object (the format
    /// pyspellchecker ships); anything else is read as `word [count]` lines.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Spelling dictionary not found: {}", path.display());
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let file = File::open(path).context(format!("Failed to open {}", path.display()))?;

        let dict = if name.ends_with(".json.gz") {
            Self::from_json_reader(GzDecoder::new(file))?
        } else if name.ends_with(".json") {
            Self::from_json_reader(file)?
        } else {
            Self::from_lines(BufReader::new(file))?
        };

        info!(
            "Loaded spelling dictionary {} ({} words)",
            path.display(),
            dict.len()
        );
        Ok(dict)
    }

    fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let counts: HashMap<String, u64> =
            serde_json::from_reader(reader).context("Invalid JSON word frequency dictionary")?;
        Ok(Self::from_counts(counts))
    }

    fn from_lines<R: BufRead>(reader: R) -> Result<Self> {
        let mut counts = Vec::new();
        for line in reader.lines() {
            let line = line.context("Failed to read dictionary line")?;
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let count = parts.next().and_then(|c| c.parse().ok()).unwrap_or(1);
            counts.push((word.to_string(), count));
        }
        Ok(Self::from_counts(counts))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.counts.contains_key(word)
    }

    pub fn frequency(&self, word: &str) -> u64 {
        self.counts.get(word).copied().unwrap_or(0)
    }
}

/// Every string one edit (delete, transpose, replace, insert) away from `word`
fn edits1(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let n = chars.len();
    let mut edits = Vec::with_capacity(54 * n + 25);

    for i in 0..n {
        let mut w = chars.clone();
        w.remove(i);
        edits.push(w.into_iter().collect());
    }
    for i in 0..n.saturating_sub(1) {
        let mut w = chars.clone();
        w.swap(i, i + 1);
        edits.push(w.into_iter().collect());
    }
    for i in 0..n {
        for c in ALPHABET.chars() {
            if chars[i] != c {
                let mut w = chars.clone();
                w[i] = c;
                edits.push(w.into_iter().collect());
            }
        }
    }
    for i in 0..=n {
        for c in ALPHABET.chars() {
            let mut w = chars.clone();
            w.insert(i, c);
            edits.push(w.into_iter().collect());
        }
    }

    edits
}

/// Dictionary-backed corrector with an LRU cache
pub struct DictionarySpellCorrector {
    dictionary: FrequencyDictionary,
    /// Lower-cased word to its correction, `None` when nothing better exists
    cache: Mutex<LruCache<String, Option<String>>>,
}

impl std::fmt::Debug for DictionarySpellCorrector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionarySpellCorrector")
            .field("words", &self.dictionary.len())
            .finish_non_exhaustive()
    }
}

impl DictionarySpellCorrector {
    pub fn new(dictionary: FrequencyDictionary) -> Self {
        Self::with_cache_size(dictionary, DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(dictionary: FrequencyDictionary, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            dictionary,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn dictionary(&self) -> &FrequencyDictionary {
        &self.dictionary
    }

    /// Most frequent known candidate; ties go to the lexicographically smaller word
    fn best_of<I: IntoIterator<Item = String>>(&self, candidates: I) -> Option<String> {
        candidates
            .into_iter()
            .filter_map(|w| {
                let freq = self.dictionary.frequency(&w);
                (freq > 0).then_some((freq, w))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
            .map(|(_, w)| w)
    }

    /// Correction of a lower-case alphabetic word, `None` when nothing is close
    pub fn correction(&self, word: &str) -> Option<String> {
        if self.dictionary.contains(word) {
            return Some(word.to_string());
        }
        let first = edits1(word);
        if let Some(best) = self.best_of(first.iter().cloned()) {
            return Some(best);
        }
        let second = first.iter().flat_map(|e| edits1(e));
        self.best_of(second)
    }

    fn correct_core(&self, core: &str) -> String {
        let lower = core.to_lowercase();
        if self.dictionary.contains(&lower) {
            return core.to_string();
        }

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&lower) {
                return hit.clone().unwrap_or_else(|| core.to_string());
            }
        }

        let correction = self.correction(&lower);
        if let Some(corrected) = &correction {
            debug!("Spelling: {} -> {}", core, corrected);
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(lower, correction.clone());
        }
        correction.unwrap_or_else(|| core.to_string())
    }
}

/// Split `token` into leading punctuation, word core and trailing punctuation
fn split_punctuation(token: &str) -> (&str, &str, &str) {
    let start = token
        .char_indices()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    let end = token
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(start);
    (&token[..start], &token[start..end], &token[end..])
}

impl SpellCorrector for DictionarySpellCorrector {
    fn correct_word(&self, word: &str) -> String {
        if is_placeholder(word) {
            return word.to_string();
        }
        let (lead, core, trail) = split_punctuation(word);
        let correctable = !core.is_empty()
            && core.chars().count() <= MAX_CORRECTABLE_LEN
            && core.chars().all(|c| c.is_ascii_alphabetic() || c == '\'');
        if !correctable {
            return word.to_string();
        }
        format!("{}{}{}", lead, self.correct_core(core), trail)
    }
}
