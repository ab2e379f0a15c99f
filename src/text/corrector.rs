// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Entity-preserving sentence correction
//!
//! Per sentence: protect named entities, apply grammar suggestions, correct
//! spelling word by word, then restore the entities. One grammar session is
//! held for the whole batch.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entities::{preserve_entities, restore_entities, EntityRecognizer};
use super::grammar::{apply_matches, GrammarProvider, GrammarSession};
use super::spelling::SpellCorrector;
use crate::errors::PipelineError;

/// Whether `text` has anything worth correcting
pub fn has_ascii_letters(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

/// Grammar + spelling corrector that leaves names alone
#[derive(Clone)]
pub struct TextCorrector {
    entities: Arc<dyn EntityRecognizer>,
    grammar: Arc<dyn GrammarProvider>,
    speller: Arc<dyn SpellCorrector>,
}

impl std::fmt::Debug for TextCorrector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextCorrector")
            .field("grammar", &self.grammar.name())
            .finish_non_exhaustive()
    }
}

impl TextCorrector {
    pub fn new(
        entities: Arc<dyn EntityRecognizer>,
        grammar: Arc<dyn GrammarProvider>,
        speller: Arc<dyn SpellCorrector>,
    ) -> Self {
        Self {
            entities,
            grammar,
            speller,
        }
    }

    /// Correct a batch of sentences, preserving length and order
    ///
    /// # Errors
    /// `CorrectionUnavailable` when the grammar session cannot be opened.
    /// Failures on individual sentences fall back to the raw sentence.
    pub async fn correct(&self, sentences: &[String]) -> Result<Vec<String>, PipelineError> {
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = self.grammar.acquire().await?;
        debug!(
            "Opened {} grammar session for {} sentences",
            self.grammar.name(),
            sentences.len()
        );

        let mut corrected = Vec::with_capacity(sentences.len());
        for sentence in sentences {
            corrected.push(self.correct_sentence(session.as_mut(), sentence).await);
        }

        if let Err(e) = session.close().await {
            warn!("Failed to close {} grammar session: {}", self.grammar.name(), e);
        }

        info!("Corrected {} sentences", corrected.len());
        Ok(corrected)
    }

    async fn correct_sentence(&self, session: &mut dyn GrammarSession, sentence: &str) -> String {
        if !has_ascii_letters(sentence) {
            return sentence.to_string();
        }

        let entities = match self.entities.recognize(sentence) {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Entity recognition failed, keeping raw text: {}", e);
                return sentence.to_string();
            }
        };
        let (protected, placeholders) = preserve_entities(sentence, &entities);

        let matches = match session.check(&protected).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Grammar check failed, keeping raw text: {}", e);
                return sentence.to_string();
            }
        };
        let grammar_fixed = apply_matches(&protected, &matches);

        let spelled = self.speller.correct_text(&grammar_fixed);
        restore_entities(&spelled, &placeholders)
    }
}
