// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text normalization for recognized bubble text
//!
//! Components:
//! - `entities` - Named-entity detection and placeholder protection
//! - `grammar` - Grammar session traits and in-process rules
//! - `language_tool` - LanguageTool HTTP backend
//! - `spelling` - Frequency-dictionary spelling correction
//! - `corrector` - The combined per-batch corrector

pub mod corrector;
pub mod entities;
pub mod grammar;
pub mod language_tool;
pub mod spelling;

pub use corrector::TextCorrector;
pub use entities::{Entity, EntityLabel, EntityRecognizer, NoEntities, OnnxEntityRecognizer};
pub use grammar::{GrammarMatch, GrammarProvider, GrammarSession, RuleBasedGrammar};
pub use language_tool::{LanguageTool, LanguageToolConfig};
pub use spelling::{DictionarySpellCorrector, FrequencyDictionary, SpellCorrector};
