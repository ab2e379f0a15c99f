// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text recognition for preprocessed bubble regions
//!
//! Components:
//! - `detection` - Text-line detection (PaddleOCR DB model)
//! - `recognition` - Line recognition with CTC decoding
//! - `preprocessing` - Tensor preparation for both models

pub mod detection;
pub mod preprocessing;
pub mod recognition;

use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, instrument};

pub use detection::{TextLine, TextLineDetector};
pub use recognition::{CharDictionary, CtcLineRecognizer, RecognizedLine};

use preprocessing::preprocess_for_recognition;

/// Turns one preprocessed region into a single string
pub trait TextRecognizer: Send + Sync {
    /// Recognized text, possibly empty
    fn recognize(&self, image: &DynamicImage) -> Result<String>;
}

/// Join recognized lines with single spaces, dropping empty ones
pub fn join_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let trimmed = line.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// PaddleOCR detection + recognition
#[derive(Debug, Clone)]
pub struct PaddleTextRecognizer {
    detector: TextLineDetector,
    recognizer: CtcLineRecognizer,
}

impl PaddleTextRecognizer {
    pub fn new(detector: TextLineDetector, recognizer: CtcLineRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load both models from a PaddleOCR model directory
    ///
    /// Expected files: `det_model.onnx`, `rec_model.onnx`, `en_dict.txt`
    pub async fn from_dir<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let dir = model_dir.as_ref();
        let detector = TextLineDetector::new(dir.join("det_model.onnx")).await?;
        let recognizer =
            CtcLineRecognizer::new(dir.join("rec_model.onnx"), dir.join("en_dict.txt")).await?;
        Ok(Self::new(detector, recognizer))
    }
}

impl TextRecognizer for PaddleTextRecognizer {
    #[instrument(level = "debug", skip_all)]
    fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let lines = self.detector.detect(image)?;

        let mut texts = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().filter(|l| l.is_valid()).enumerate() {
            let Some(crop) = line.crop(image) else {
                continue;
            };
            let recognized = self
                .recognizer
                .recognize(preprocess_for_recognition(&crop))
                .context(format!("Failed to recognize text line {}", i + 1))?;
            debug!(
                "Line {}: {:?} (confidence {:.2})",
                i + 1,
                recognized.text,
                recognized.confidence
            );
            texts.push(recognized.text);
        }

        Ok(join_lines(texts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_lines_single_spaces() {
        assert_eq!(join_lines(["HELLO", "  THERE  "]), "HELLO THERE");
    }

    #[test]
    fn test_join_lines_drops_empty() {
        assert_eq!(join_lines(["", "WAIT!", "   ", "NO"]), "WAIT! NO");
        assert_eq!(join_lines(Vec::<String>::new()), "");
    }

    #[tokio::test]
    async fn test_from_dir_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let err = PaddleTextRecognizer::from_dir(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
