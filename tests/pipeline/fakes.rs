// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! In-memory detector and recognizer used by the pipeline tests

use anyhow::{bail, Result};
use bubble_ocr::text::{
    DictionarySpellCorrector, FrequencyDictionary, NoEntities, RuleBasedGrammar, TextCorrector,
};
use bubble_ocr::vision::preprocessing::PreprocessOptions;
use bubble_ocr::vision::{BoundingBox, BubbleCandidate, BubbleDetector, TextRecognizer};
use bubble_ocr::{BubblePipeline, PipelineOptions};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Returns the same candidates for every page
pub struct FixedDetector {
    pub candidates: Vec<BubbleCandidate>,
}

impl FixedDetector {
    pub fn new(candidates: Vec<BubbleCandidate>) -> Self {
        Self { candidates }
    }
}

impl BubbleDetector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BubbleCandidate>> {
        Ok(self.candidates.clone())
    }
}

pub struct FailingDetector;

impl BubbleDetector for FailingDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<BubbleCandidate>> {
        bail!("detector session crashed")
    }
}

/// Maps region size to text; records every size it was asked about.
///
/// With upscaling disabled the preprocessed region keeps the crop size, so
/// the size identifies which bubble is being read.
#[derive(Default)]
pub struct SizeKeyedRecognizer {
    pub texts: HashMap<(u32, u32), String>,
    pub failing: Vec<(u32, u32)>,
    pub calls: Mutex<Vec<(u32, u32)>>,
}

impl SizeKeyedRecognizer {
    pub fn with_texts(texts: &[((u32, u32), &str)]) -> Self {
        Self {
            texts: texts.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TextRecognizer for SizeKeyedRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let size = (image.width(), image.height());
        self.calls.lock().unwrap().push(size);
        if self.failing.contains(&size) {
            bail!("recognizer failed for {:?}", size);
        }
        Ok(self.texts.get(&size).cloned().unwrap_or_default())
    }
}

pub fn bubble(x1: u32, y1: u32, x2: u32, y2: u32) -> BubbleCandidate {
    BubbleCandidate::new(BoundingBox::new(x1, y1, x2, y2), 0, 0.9)
}

pub fn blank_page(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
}

pub fn write_page(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    blank_page(200, 200).save(&path).unwrap();
    path
}

pub fn corrector() -> TextCorrector {
    let dictionary = FrequencyDictionary::from_counts([
        ("first", 80),
        ("second", 70),
        ("bubble", 60),
        ("hello", 100),
        ("friend", 50),
        ("run", 40),
    ]);
    TextCorrector::new(
        Arc::new(NoEntities),
        Arc::new(RuleBasedGrammar),
        Arc::new(DictionarySpellCorrector::new(dictionary)),
    )
}

pub fn pipeline(
    detector: impl BubbleDetector + 'static,
    recognizer: Arc<SizeKeyedRecognizer>,
) -> BubblePipeline {
    BubblePipeline::new(Arc::new(detector), recognizer, corrector())
}

/// Options that keep crop sizes unchanged through preprocessing
pub fn size_preserving_options() -> PipelineOptions {
    PipelineOptions {
        preprocess: PreprocessOptions {
            upscale: false,
            ..Default::default()
        },
        ..Default::default()
    }
}
