// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bubble-to-text pipeline
//!
//! detect → preprocess → OCR → reading order → correction, one page at a time.
//! Services are built once and shared; each call only borrows the page image.

pub mod batch;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{ComicOcrConfig, GrammarBackend};
use crate::errors::PipelineError;
use crate::reading_order::{self, RawTextFragment, DEFAULT_ALPHA};
use crate::text::{
    DictionarySpellCorrector, EntityRecognizer, FrequencyDictionary, GrammarProvider, LanguageTool,
    NoEntities, OnnxEntityRecognizer, RuleBasedGrammar, TextCorrector,
};
use crate::vision::detection::{save_bubble_crops, BubbleDetector, YoloBubbleDetector, SPEECH_BUBBLE_CLASS};
use crate::vision::image_utils::{decode_image_bytes, load_page_image};
use crate::vision::ocr::{PaddleTextRecognizer, TextRecognizer};
use crate::vision::preprocessing::{preprocess, PreprocessOptions};

pub use batch::{BatchReport, FailurePolicy, PageFailure, PageReport};

/// Per-run pipeline options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Write every detected region to `crops_dir`
    pub save_crops: bool,
    pub crops_dir: PathBuf,
    /// Detector class treated as speech bubble
    pub speech_bubble_class: usize,
    pub reading_order_alpha: f64,
    pub preprocess: PreprocessOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            save_crops: false,
            crops_dir: PathBuf::from("bubble_crops"),
            speech_bubble_class: SPEECH_BUBBLE_CLASS,
            reading_order_alpha: DEFAULT_ALPHA,
            preprocess: PreprocessOptions::default(),
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.reading_order_alpha.is_finite() {
            return Err(PipelineError::InvalidOptions(format!(
                "reading order alpha must be finite, got {}",
                self.reading_order_alpha
            )));
        }
        if self.save_crops && self.crops_dir.as_os_str().is_empty() {
            return Err(PipelineError::InvalidOptions(
                "crops_dir must be set when save_crops is enabled".to_string(),
            ));
        }
        self.preprocess.validate()
    }
}

/// Ordered, corrected text of one page
///
/// Deserializing ignores stored counts and derives them from the sentences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredResult")]
pub struct PipelineResult {
    ordered_sentences: Vec<String>,
    bubble_count: usize,
    total_word_count: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredResult {
    #[serde(default)]
    ordered_sentences: Vec<String>,
}

impl From<StoredResult> for PipelineResult {
    fn from(stored: StoredResult) -> Self {
        Self::new(stored.ordered_sentences)
    }
}

impl PipelineResult {
    /// Build from the final sentences; counts are derived from them
    pub fn new(ordered_sentences: Vec<String>) -> Self {
        let total_word_count = ordered_sentences
            .iter()
            .map(|s| s.split_whitespace().count())
            .sum();
        Self {
            bubble_count: ordered_sentences.len(),
            total_word_count,
            ordered_sentences,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn ordered_sentences(&self) -> &[String] {
        &self.ordered_sentences
    }

    pub fn bubble_count(&self) -> usize {
        self.bubble_count
    }

    pub fn total_word_count(&self) -> usize {
        self.total_word_count
    }

    /// Mean words per bubble, 0.0 for a page without bubbles
    pub fn avg_words_per_bubble(&self) -> f64 {
        if self.bubble_count == 0 {
            0.0
        } else {
            self.total_word_count as f64 / self.bubble_count as f64
        }
    }

    pub fn into_sentences(self) -> Vec<String> {
        self.ordered_sentences
    }
}

/// Detector, recognizer and corrector wired together
#[derive(Clone)]
pub struct BubblePipeline {
    detector: Arc<dyn BubbleDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    corrector: TextCorrector,
}

impl std::fmt::Debug for BubblePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BubblePipeline")
            .field("corrector", &self.corrector)
            .finish_non_exhaustive()
    }
}

impl BubblePipeline {
    pub fn new(
        detector: Arc<dyn BubbleDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        corrector: TextCorrector,
    ) -> Self {
        Self {
            detector,
            recognizer,
            corrector,
        }
    }

    /// Build the ONNX-backed services described by `config`
    ///
    /// # Errors
    /// `ModelLoad` for detector/OCR weights, `CorrectionUnavailable` for the
    /// NER model, spelling dictionary or grammar backend
    pub async fn load(config: &ComicOcrConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let detector = YoloBubbleDetector::new(&config.models.detector)
            .await
            .map_err(|source| PipelineError::ModelLoad {
                model: "bubble detector",
                source,
            })?
            .with_confidence_threshold(config.detector.confidence_threshold)
            .with_iou_threshold(config.detector.iou_threshold);

        let recognizer = PaddleTextRecognizer::from_dir(&config.models.ocr_dir)
            .await
            .map_err(|source| PipelineError::ModelLoad { model: "ocr", source })?;

        let entities: Arc<dyn EntityRecognizer> = match &config.models.ner_dir {
            Some(dir) => Arc::new(OnnxEntityRecognizer::new(dir).await.map_err(|e| {
                PipelineError::CorrectionUnavailable {
                    stage: "ner",
                    reason: e.to_string(),
                }
            })?),
            None => {
                info!("No NER model configured; entity protection disabled");
                Arc::new(NoEntities)
            }
        };

        let dictionary = FrequencyDictionary::load(&config.models.spelling_dictionary).map_err(
            |e| PipelineError::CorrectionUnavailable {
                stage: "spelling",
                reason: e.to_string(),
            },
        )?;

        let grammar: Arc<dyn GrammarProvider> = match config.grammar.backend {
            GrammarBackend::Rules => Arc::new(RuleBasedGrammar),
            GrammarBackend::LanguageTool => {
                Arc::new(LanguageTool::new(config.grammar.language_tool.clone())?)
            }
        };

        let corrector = TextCorrector::new(
            entities,
            grammar,
            Arc::new(DictionarySpellCorrector::new(dictionary)),
        );

        info!("Bubble pipeline ready");
        Ok(Self::new(Arc::new(detector), Arc::new(recognizer), corrector))
    }

    /// Extract, order and correct the bubble text of one page image file
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn extract_and_correct<P: AsRef<Path>>(
        &self,
        path: P,
        options: &PipelineOptions,
    ) -> Result<PipelineResult, PipelineError> {
        options.validate()?;
        let image = load_page_image(path.as_ref())?;
        self.process_image(&image, options).await
    }

    /// Same as `extract_and_correct` for a page already held in memory
    ///
    /// # Errors
    /// `ImageLoadBytes` when the data is empty or not a supported image
    #[instrument(level = "info", skip_all, fields(bytes = bytes.len()))]
    pub async fn process_bytes(
        &self,
        bytes: &[u8],
        options: &PipelineOptions,
    ) -> Result<PipelineResult, PipelineError> {
        options.validate()?;
        let image = decode_image_bytes(bytes)?;
        debug!("Decoded in-memory page ({}x{})", image.width(), image.height());
        self.process_image(&image, options).await
    }

    /// Recognized, non-empty bubble texts in detection order
    ///
    /// Region-level failures are logged and the region is skipped.
    pub fn extract_fragments(
        &self,
        image: &image::DynamicImage,
        options: &PipelineOptions,
    ) -> Result<Vec<RawTextFragment>, PipelineError> {
        let candidates = self.detector.detect(image).map_err(PipelineError::Detection)?;
        debug!("Detector returned {} candidates", candidates.len());

        if options.save_crops {
            let saved = save_bubble_crops(image, &candidates, &options.crops_dir);
            debug!("Saved {} crops to {}", saved, options.crops_dir.display());
        }

        let (page_w, page_h) = (image.width(), image.height());
        let mut fragments = Vec::new();

        for candidate in candidates
            .iter()
            .filter(|c| c.class_id == options.speech_bubble_class)
        {
            let bbox = candidate.bbox.clipped(page_w, page_h);
            if bbox.is_degenerate() {
                debug!("Skipping degenerate region {}", bbox);
                continue;
            }

            let region = match preprocess(&bbox.crop(image), &options.preprocess) {
                Ok(region) => region,
                Err(e) => {
                    warn!("Skipping region {}: {}", bbox, e);
                    continue;
                }
            };

            let text = match self.recognizer.recognize(&region) {
                Ok(text) => text,
                Err(source) => {
                    let err = PipelineError::Recognition {
                        region: bbox,
                        source,
                    };
                    warn!("{}", err);
                    continue;
                }
            };

            let text = text.trim();
            if text.is_empty() {
                debug!("No text in region {}", bbox);
                continue;
            }
            fragments.push(RawTextFragment::new(text, bbox.anchor()));
        }

        Ok(fragments)
    }

    /// Run the full pipeline on an already decoded page
    pub async fn process_image(
        &self,
        image: &image::DynamicImage,
        options: &PipelineOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let fragments = self.extract_fragments(image, options)?;
        if fragments.is_empty() {
            info!("No speech bubbles with text found");
            return Ok(PipelineResult::empty());
        }

        let order = reading_order::order(&fragments, options.reading_order_alpha);
        let sentences: Vec<String> = order
            .into_iter()
            .map(|i| fragments[i].text.clone())
            .collect();

        let corrected = self.corrector.correct(&sentences).await?;
        let lowered = corrected.into_iter().map(|s| s.to_lowercase()).collect();

        let result = PipelineResult::new(lowered);
        info!(
            "Extracted {} bubbles, {} words",
            result.bubble_count(),
            result.total_word_count()
        );
        Ok(result)
    }
}

/// Load services from `config` and process a single page
pub async fn run<P: AsRef<Path>>(
    config: &ComicOcrConfig,
    path: P,
    options: &PipelineOptions,
) -> Result<PipelineResult, PipelineError> {
    let pipeline = BubblePipeline::load(config).await?;
    pipeline.extract_and_correct(path, options).await
}
