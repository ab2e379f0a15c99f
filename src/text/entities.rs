// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Named-entity protection for text correction
//!
//! Person and organization names are swapped for opaque placeholders before the
//! grammar and spelling passes so neither pass can "fix" them, then restored.

use anyhow::{anyhow, Context, Result};
use ndarray::{Array2, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use regex::{NoExpand, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Placeholder prefix; spelling and grammar rules skip tokens containing it
pub const PLACEHOLDER_PREFIX: &str = "__ENT";

/// Entity categories that are protected from correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityLabel {
    Person,
    Organization,
}

impl EntityLabel {
    /// Parse the type part of a BIO tag (`PER`, `PERSON`, `ORG`)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "PER" | "PERSON" => Some(Self::Person),
            "ORG" | "ORGANIZATION" => Some(Self::Organization),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: EntityLabel) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

/// Finds person and organization mentions in a sentence
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Result<Vec<Entity>>;
}

/// Recognizer used when no NER model is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEntities;

impl EntityRecognizer for NoEntities {
    fn recognize(&self, _text: &str) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
}

/// Placeholder to original-text mapping for one sentence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placeholders {
    entries: Vec<(String, String)>,
}

impl Placeholders {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, o)| (p.as_str(), o.as_str()))
    }
}

/// Replace entity mentions with `__ENT{i}__` placeholders
///
/// Entities are applied longest first so a name never clobbers a longer name
/// containing it. Equal lengths are ordered lexicographically. Only whole-word
/// occurrences are replaced.
pub fn preserve_entities(text: &str, entities: &[Entity]) -> (String, Placeholders) {
    let mut names: Vec<&str> = entities
        .iter()
        .map(|e| e.text.trim())
        .filter(|t| !t.is_empty())
        .collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    names.dedup();

    let mut protected = text.to_string();
    let mut placeholders = Placeholders::default();

    for name in names {
        let pattern = format!(r"\b{}\b", regex::escape(name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if !re.is_match(&protected) {
            continue;
        }
        let placeholder = format!("{}{}__", PLACEHOLDER_PREFIX, placeholders.len());
        protected = re
            .replace_all(&protected, NoExpand(&placeholder))
            .into_owned();
        placeholders.entries.push((placeholder, name.to_string()));
    }

    (protected, placeholders)
}

/// Put the original entity text back in place of every placeholder
pub fn restore_entities(text: &str, placeholders: &Placeholders) -> String {
    placeholders
        .iter()
        .fold(text.to_string(), |acc, (placeholder, original)| {
            acc.replace(placeholder, original)
        })
}

/// Whether a token carries an entity placeholder
pub fn is_placeholder(token: &str) -> bool {
    token.contains(PLACEHOLDER_PREFIX)
}

/// Group per-token BIO tags into entity spans
///
/// `offsets` are byte ranges into `text`; `(0, 0)` marks special tokens.
/// Tags whose type is neither person nor organization are ignored.
pub fn group_bio_tags(text: &str, tags: &[&str], offsets: &[(usize, usize)]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut current: Option<(EntityLabel, usize, usize)> = None;

    let mut flush = |current: &mut Option<(EntityLabel, usize, usize)>| {
        if let Some((label, start, end)) = current.take() {
            if let Some(span) = text.get(start..end) {
                let span = span.trim();
                if !span.is_empty() {
                    entities.push(Entity::new(span, label));
                }
            }
        }
    };

    for (tag, &(start, end)) in tags.iter().zip(offsets) {
        if start == end {
            continue;
        }
        let (prefix, kind) = match tag.split_once('-') {
            Some((p, k)) => (p, EntityLabel::from_tag(k)),
            None => ("O", None),
        };

        match (prefix, kind, current) {
            ("I", Some(label), Some((cur_label, cur_start, _))) if cur_label == label => {
                current = Some((label, cur_start, end));
            }
            // a subword continuing the previous token joins its entity
            ("B", Some(label), Some((cur_label, cur_start, cur_end)))
                if cur_label == label && cur_end == start =>
            {
                current = Some((label, cur_start, end));
            }
            (_, Some(label), _) => {
                flush(&mut current);
                current = Some((label, start, end));
            }
            _ => flush(&mut current),
        }
    }
    flush(&mut current);

    entities
}

#[derive(Debug, Deserialize)]
struct TokenClassifierConfig {
    id2label: HashMap<String, String>,
}

/// Token-classification NER model exported to ONNX
///
/// Expects a directory with `model.onnx`, `tokenizer.json` and the HuggingFace
/// `config.json` carrying `id2label`.
#[derive(Clone)]
pub struct OnnxEntityRecognizer {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    labels: Arc<Vec<String>>,
    needs_token_type_ids: bool,
}

impl std::fmt::Debug for OnnxEntityRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEntityRecognizer")
            .field("labels", &self.labels.len())
            .field("needs_token_type_ids", &self.needs_token_type_ids)
            .finish_non_exhaustive()
    }
}

impl OnnxEntityRecognizer {
    pub async fn new<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let dir = model_dir.as_ref();
        let model_path = dir.join("model.onnx");
        let tokenizer_path = dir.join("tokenizer.json");
        let config_path = dir.join("config.json");

        if !model_path.exists() {
            anyhow::bail!("NER model not found: {}", model_path.display());
        }
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }

        info!("Loading NER model from {}", dir.display());

        let labels = load_labels(&config_path)?;

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra threads")?
            .commit_from_file(&model_path)
            .context(format!(
                "Failed to load NER model from {}",
                model_path.display()
            ))?;

        let needs_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        debug!(
            "NER model loaded with {} labels (token_type_ids: {})",
            labels.len(),
            needs_token_type_ids
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            labels: Arc::new(labels),
            needs_token_type_ids,
        })
    }
}

fn load_labels(config_path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(config_path)
        .context(format!("Failed to read {}", config_path.display()))?;
    let config: TokenClassifierConfig =
        serde_json::from_str(&raw).context("config.json has no usable id2label")?;

    let mut labels = vec![String::from("O"); config.id2label.len()];
    for (id, label) in config.id2label {
        let index: usize = id
            .parse()
            .context(format!("Invalid label id in config.json: {}", id))?;
        if index >= labels.len() {
            anyhow::bail!("Label id {} out of range in config.json", index);
        }
        labels[index] = label;
    }
    Ok(labels)
}

impl EntityRecognizer for OnnxEntityRecognizer {
    fn recognize(&self, text: &str) -> Result<Vec<Entity>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let seq_len = input_ids.len();

        let input_ids_array = Array2::from_shape_vec((1, seq_len), input_ids)
            .context("Failed to create input_ids array")?;
        let attention_mask_array = Array2::from_shape_vec((1, seq_len), attention_mask)
            .context("Failed to create attention_mask array")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("NER session lock poisoned"))?;

        let outputs = if self.needs_token_type_ids {
            let token_type_ids_array = Array2::<i64>::zeros((1, seq_len));
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids_array)?,
                "attention_mask" => Value::from_array(attention_mask_array)?,
                "token_type_ids" => Value::from_array(token_type_ids_array)?
            ])?
        } else {
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids_array)?,
                "attention_mask" => Value::from_array(attention_mask_array)?
            ])?
        };

        // [1, seq_len, num_labels]
        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract NER logits")?;
        let shape = logits.shape().to_vec();
        if shape.len() != 3 || shape[1] != seq_len {
            anyhow::bail!("Unexpected NER output shape: {:?}", shape);
        }

        let tags: Vec<&str> = (0..seq_len)
            .map(|t| {
                let mut best = 0usize;
                for c in 1..shape[2] {
                    if logits[IxDyn(&[0, t, c])] > logits[IxDyn(&[0, t, best])] {
                        best = c;
                    }
                }
                self.labels.get(best).map(String::as_str).unwrap_or("O")
            })
            .collect();

        Ok(group_bio_tags(text, &tags, encoding.get_offsets()))
    }
}
