// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Grammar checking
//!
//! A `GrammarProvider` hands out one `GrammarSession` per correction batch.
//! Sessions may own external resources (a server process, a connection) and
//! must be closed when the batch ends; dropping a session releases it as well.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::entities::is_placeholder;
use crate::errors::PipelineError;

/// Compile a literal pattern once
macro_rules! regex {
    ($re:literal) => {{
        static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| Regex::new($re).expect("invalid regex literal"))
    }};
}

/// A suggested fix over a char range of the checked text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarMatch {
    /// Start, in chars
    pub offset: usize,
    /// Length, in chars
    pub length: usize,
    pub replacements: Vec<String>,
    pub rule_id: String,
    pub message: String,
}

impl GrammarMatch {
    pub fn new(offset: usize, length: usize, replacement: impl Into<String>, rule_id: &str) -> Self {
        Self {
            offset,
            length,
            replacements: vec![replacement.into()],
            rule_id: rule_id.to_string(),
            message: String::new(),
        }
    }

    fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// A live grammar-checking resource scoped to one batch
#[async_trait]
pub trait GrammarSession: Send {
    /// Issues found in `text`
    async fn check(&mut self, text: &str) -> anyhow::Result<Vec<GrammarMatch>>;

    /// Release the session's resources; calling it twice is a no-op
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Source of grammar sessions
#[async_trait]
pub trait GrammarProvider: Send + Sync {
    /// Open a session for one batch
    ///
    /// # Errors
    /// `PipelineError::CorrectionUnavailable` when the backend cannot start
    async fn acquire(&self) -> Result<Box<dyn GrammarSession>, PipelineError>;

    fn name(&self) -> &'static str;
}

/// Apply the first replacement of every match to `text`
///
/// Matches are taken in offset order; one that overlaps an earlier accepted
/// match, falls outside the text or has no replacement is skipped.
pub fn apply_matches(text: &str, matches: &[GrammarMatch]) -> String {
    let mut chars: Vec<char> = text.chars().collect();

    let mut sorted: Vec<&GrammarMatch> = matches
        .iter()
        .filter(|m| !m.replacements.is_empty() && m.end() <= chars.len())
        .collect();
    sorted.sort_by_key(|m| (m.offset, m.length));

    let mut accepted: Vec<&GrammarMatch> = Vec::with_capacity(sorted.len());
    let mut last_end = 0usize;
    for m in sorted {
        if !accepted.is_empty() && m.offset < last_end {
            continue;
        }
        last_end = m.end();
        accepted.push(m);
    }

    for m in accepted.into_iter().rev() {
        chars.splice(m.offset..m.end(), m.replacements[0].chars());
    }

    chars.into_iter().collect()
}

/// Char offset of a byte offset in `text`
fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// In-process grammar rules for common OCR and typing slips
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedGrammar;

#[async_trait]
impl GrammarProvider for RuleBasedGrammar {
    async fn acquire(&self) -> Result<Box<dyn GrammarSession>, PipelineError> {
        Ok(Box::new(RuleBasedSession))
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

/// Session for `RuleBasedGrammar`; holds no resources
#[derive(Debug, Default)]
pub struct RuleBasedSession;

#[async_trait]
impl GrammarSession for RuleBasedSession {
    async fn check(&mut self, text: &str) -> anyhow::Result<Vec<GrammarMatch>> {
        Ok(check_rules(text))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run every rule over `text`
pub fn check_rules(text: &str) -> Vec<GrammarMatch> {
    let mut matches = Vec::new();
    matches.extend(repeated_words(text));
    matches.extend(space_before_punctuation(text));
    matches.extend(missing_space_after_punctuation(text));
    matches.extend(multiple_spaces(text));
    matches.extend(lowercase_pronoun_i(text));
    matches.extend(indefinite_articles(text));
    matches.sort_by_key(|m| m.offset);
    matches
}

fn word_regex() -> &'static Regex {
    regex!(r"[\w']+")
}

fn repeated_words(text: &str) -> Vec<GrammarMatch> {
    let words: Vec<regex::Match> = word_regex().find_iter(text).collect();
    words
        .windows(2)
        .filter(|pair| {
            let between = &text[pair[0].end()..pair[1].start()];
            !between.is_empty()
                && between.chars().all(char::is_whitespace)
                && pair[0].as_str().eq_ignore_ascii_case(pair[1].as_str())
                && !is_placeholder(pair[0].as_str())
                && pair[0].as_str().chars().any(char::is_alphabetic)
        })
        .map(|pair| {
            let start = char_offset(text, pair[0].end());
            let end = char_offset(text, pair[1].end());
            let mut m = GrammarMatch::new(start, end - start, "", "DUPLICATE_WORD");
            m.message = format!("Repeated word \"{}\"", pair[1].as_str());
            m
        })
        .collect()
}

fn space_before_punctuation(text: &str) -> Vec<GrammarMatch> {
    regex!(r"[ \t]+([,.!?;:])")
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let punct = caps.get(1)?;
            // leading whitespace is not "before" anything
            if whole.start() == 0 {
                return None;
            }
            let start = char_offset(text, whole.start());
            let end = char_offset(text, whole.end());
            Some(GrammarMatch::new(
                start,
                end - start,
                punct.as_str(),
                "SPACE_BEFORE_PUNCTUATION",
            ))
        })
        .collect()
}

fn missing_space_after_punctuation(text: &str) -> Vec<GrammarMatch> {
    regex!(r"([,;:])([A-Za-z])")
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let start = char_offset(text, whole.start());
            Some(GrammarMatch::new(
                start,
                2,
                format!("{} {}", &caps[1], &caps[2]),
                "MISSING_SPACE_AFTER_PUNCTUATION",
            ))
        })
        .collect()
}

fn multiple_spaces(text: &str) -> Vec<GrammarMatch> {
    regex!(r" {2,}")
        .find_iter(text)
        .filter(|m| m.start() > 0 && m.end() < text.len())
        .map(|m| {
            let start = char_offset(text, m.start());
            GrammarMatch::new(start, m.end() - m.start(), " ", "MULTIPLE_SPACES")
        })
        .collect()
}

fn lowercase_pronoun_i(text: &str) -> Vec<GrammarMatch> {
    word_regex()
        .find_iter(text)
        .filter(|m| {
            let word = m.as_str();
            let is_i = word == "i" || word.starts_with("i'");
            // skip abbreviations such as "i.e."
            let abbreviation = text[m.end()..].starts_with('.')
                && text[m.end() + 1..]
                    .chars()
                    .next()
                    .is_some_and(char::is_alphabetic);
            is_i && !abbreviation
        })
        .map(|m| GrammarMatch::new(char_offset(text, m.start()), 1, "I", "I_LOWERCASE"))
        .collect()
}

fn indefinite_articles(text: &str) -> Vec<GrammarMatch> {
    regex!(r"\b([Aa]n?)\s+([\w']+)")
        .captures_iter(text)
        .filter_map(|caps| {
            let article = caps.get(1)?;
            let next = caps.get(2)?.as_str();
            if is_placeholder(next) {
                return None;
            }
            let first = next.chars().next()?.to_ascii_lowercase();
            let wants_an = matches!(first, 'a' | 'e' | 'i' | 'o');
            let wants_a = first.is_ascii_alphabetic() && !matches!(first, 'a' | 'e' | 'i' | 'o' | 'u' | 'h');

            let is_an = article.as_str().len() == 2;
            let capital = article.as_str().starts_with('A');
            let replacement = match (is_an, wants_an, wants_a) {
                (false, true, _) => if capital { "An" } else { "an" },
                (true, _, true) => if capital { "A" } else { "a" },
                _ => return None,
            };
            Some(GrammarMatch::new(
                char_offset(text, article.start()),
                article.as_str().len(),
                replacement,
                "EN_A_VS_AN",
            ))
        })
        .collect()
}
