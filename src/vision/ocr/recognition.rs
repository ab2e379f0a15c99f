// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! PaddleOCR text-line recognition
//!
//! A CRNN model scores every character class at each horizontal timestep;
//! greedy CTC decoding turns that into a string.

use anyhow::{anyhow, Context, Result};
use ndarray::{Array4, ArrayViewD, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::preprocessing::{REC_INPUT_HEIGHT, REC_MIN_WIDTH};

/// CTC blank class index
pub const CTC_BLANK: usize = 0;

/// Decoded line text with mean per-character confidence
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f32,
}

impl RecognizedLine {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Character classes of the recognition model
///
/// Index 0 is the CTC blank; dictionary lines follow in file order and a space
/// class is appended last, matching how PaddleOCR exports its English models.
#[derive(Debug, Clone)]
pub struct CharDictionary {
    classes: Vec<char>,
}

impl CharDictionary {
    /// Build from the characters of a dictionary file
    pub fn from_chars<I: IntoIterator<Item = char>>(chars: I) -> Self {
        let mut classes = vec!['\u{0}'];
        classes.extend(chars);
        classes.push(' ');
        Self { classes }
    }

    /// Load a one-character-per-line dictionary (e.g. en_dict.txt)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .context(format!("Failed to open dictionary: {}", path.display()))?;

        let mut chars = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read dictionary line")?;
            if let Some(ch) = line.chars().next() {
                chars.push(ch);
            }
        }

        Ok(Self::from_chars(chars))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.len() <= 2
    }

    /// Character for a class index, `None` for the blank or out-of-range
    pub fn get(&self, index: usize) -> Option<char> {
        if index == CTC_BLANK {
            return None;
        }
        self.classes.get(index).copied()
    }
}

/// Greedy (best-path) CTC decoding
///
/// Accepts `[1, T, C]` or `[T, C]` score tensors. Repeated classes collapse
/// unless separated by a blank; blanks and unknown indices emit nothing.
pub fn ctc_greedy_decode(scores: ArrayViewD<f32>, dictionary: &CharDictionary) -> Result<RecognizedLine> {
    let shape = scores.shape().to_vec();
    let (steps, classes) = match shape.len() {
        3 => (shape[1], shape[2]),
        2 => (shape[0], shape[1]),
        _ => anyhow::bail!("Unexpected recognition output shape: {:?}", shape),
    };
    let is_3d = shape.len() == 3;

    let mut text = String::new();
    let mut total = 0.0f32;
    let mut emitted = 0usize;
    let mut prev: Option<usize> = None;

    for t in 0..steps {
        let mut best = f32::NEG_INFINITY;
        let mut best_class = CTC_BLANK;
        for c in 0..classes {
            let score = if is_3d {
                scores[IxDyn(&[0, t, c])]
            } else {
                scores[IxDyn(&[t, c])]
            };
            if score > best {
                best = score;
                best_class = c;
            }
        }

        if best_class != CTC_BLANK && Some(best_class) != prev {
            if let Some(ch) = dictionary.get(best_class) {
                text.push(ch);
                total += best;
                emitted += 1;
            }
        }

        prev = if best_class == CTC_BLANK {
            None
        } else {
            Some(best_class)
        };
    }

    let confidence = if emitted == 0 {
        0.0
    } else {
        (total / emitted as f32).clamp(0.0, 1.0)
    };

    Ok(RecognizedLine { text, confidence })
}

/// PaddleOCR CTC line recognizer
#[derive(Clone)]
pub struct CtcLineRecognizer {
    session: Arc<Mutex<Session>>,
    dictionary: Arc<CharDictionary>,
    input_name: String,
}

impl std::fmt::Debug for CtcLineRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtcLineRecognizer")
            .field("dictionary_size", &self.dictionary.len())
            .field("input_name", &self.input_name)
            .finish_non_exhaustive()
    }
}

impl CtcLineRecognizer {
    /// Load the recognition model (rec_model.onnx) and its dictionary
    ///
    /// # Errors
    /// Returns error if either file is missing or ONNX Runtime rejects the model
    pub async fn new<P: AsRef<Path>>(model_path: P, dict_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let dict_path = dict_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("OCR recognition model not found: {}", model_path.display());
        }
        if !dict_path.exists() {
            anyhow::bail!(
                "OCR character dictionary not found: {}",
                dict_path.display()
            );
        }

        info!(
            "Loading OCR recognition model from {}",
            model_path.display()
        );

        let dictionary = CharDictionary::load(dict_path)?;
        debug!("Loaded character dictionary with {} classes", dictionary.len());

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .context(format!(
                "Failed to load OCR recognition model from {}",
                model_path.display()
            ))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            dictionary: Arc::new(dictionary),
            input_name,
        })
    }

    pub fn dictionary_size(&self) -> usize {
        self.dictionary.len()
    }

    /// Recognize one line from a `[1, 3, 48, W]` tensor
    pub fn recognize(&self, input: Array4<f32>) -> Result<RecognizedLine> {
        let shape = input.shape();
        if shape[0] != 1
            || shape[1] != 3
            || shape[2] != REC_INPUT_HEIGHT as usize
            || shape[3] < REC_MIN_WIDTH as usize
        {
            anyhow::bail!(
                "Invalid input shape: {:?}, expected [1, 3, {}, W>={}]",
                shape,
                REC_INPUT_HEIGHT,
                REC_MIN_WIDTH
            );
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("OCR recognition session lock poisoned"))?;

        let input_value = Value::from_array(input).context("Failed to create input tensor")?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .context("Recognition inference failed")?;

        let scores = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        ctc_greedy_decode(scores.view(), &self.dictionary)
    }
}
