// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! PaddleOCR text-line detection
//!
//! Finds text lines inside an already-cropped bubble. The DB model emits a
//! per-pixel text probability map; connected pixels above the threshold are
//! grouped into line boxes.

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use ndarray::{ArrayViewD, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::preprocessing::{preprocess_for_line_detection, LineScale};

const DEFAULT_LINE_THRESHOLD: f32 = 0.3;

/// Connected regions smaller than this many map pixels are noise
const MIN_LINE_PIXELS: usize = 10;

/// Vertical padding added around each line, as a fraction of its height
const LINE_PADDING_RATIO: f32 = 0.15;

/// A text line in region pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Mean probability of the line's pixels
    pub confidence: f32,
}

impl TextLine {
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.confidence > 0.0
    }

    /// Crop the line out of `image`, padded vertically and clamped to bounds
    pub fn crop(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let pad = self.height * LINE_PADDING_RATIO;
        let x1 = self.x.max(0.0).floor() as u32;
        let y1 = (self.y - pad).max(0.0).floor() as u32;
        let x2 = ((self.x + self.width).ceil() as u32).min(image.width());
        let y2 = ((self.y + self.height + pad).ceil() as u32).min(image.height());
        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(image.crop_imm(x1, y1, x2 - x1, y2 - y1))
    }
}

/// Group a DB probability map (`[1, 1, H, W]` or `[1, H, W]`) into line boxes
///
/// Boxes are scaled back to region coordinates and returned top-to-bottom, then
/// left-to-right.
pub fn extract_text_lines(
    prob_map: ArrayViewD<f32>,
    threshold: f32,
    scale: &LineScale,
) -> Result<Vec<TextLine>> {
    let shape = prob_map.shape().to_vec();
    let (height, width) = match shape.len() {
        4 => (shape[2], shape[3]),
        3 => (shape[1], shape[2]),
        _ => anyhow::bail!("Unexpected probability map shape: {:?}", shape),
    };
    let is_4d = shape.len() == 4;
    let prob = |x: usize, y: usize| -> f32 {
        if is_4d {
            prob_map[IxDyn(&[0, 0, y, x])]
        } else {
            prob_map[IxDyn(&[0, y, x])]
        }
    };

    let mut visited = vec![false; width * height];
    let mut lines = Vec::new();

    for start_y in 0..height {
        for start_x in 0..width {
            if visited[start_y * width + start_x] || prob(start_x, start_y) < threshold {
                continue;
            }

            let mut stack = vec![(start_x, start_y)];
            let (mut min_x, mut max_x, mut min_y, mut max_y) = (start_x, start_x, start_y, start_y);
            let mut count = 0usize;
            let mut sum = 0.0f32;

            while let Some((x, y)) = stack.pop() {
                let idx = y * width + x;
                if visited[idx] {
                    continue;
                }
                let p = prob(x, y);
                if p < threshold {
                    continue;
                }
                visited[idx] = true;
                count += 1;
                sum += p;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);

                if x > 0 {
                    stack.push((x - 1, y));
                }
                if x + 1 < width {
                    stack.push((x + 1, y));
                }
                if y > 0 {
                    stack.push((x, y - 1));
                }
                if y + 1 < height {
                    stack.push((x, y + 1));
                }
            }

            if count < MIN_LINE_PIXELS {
                continue;
            }

            let (x0, y0) = scale.map_to_region(min_x as f32, min_y as f32);
            let (x1, y1) = scale.map_to_region((max_x + 1) as f32, (max_y + 1) as f32);
            lines.push(TextLine {
                x: x0,
                y: y0,
                width: x1 - x0,
                height: y1 - y0,
                confidence: sum / count as f32,
            });
        }
    }

    lines.sort_by(|a, b| {
        a.y.partial_cmp(&b.y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
    });

    Ok(lines)
}

/// PaddleOCR DB text-line detector
#[derive(Clone)]
pub struct TextLineDetector {
    session: Arc<Mutex<Session>>,
    input_name: String,
    threshold: f32,
}

impl std::fmt::Debug for TextLineDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextLineDetector")
            .field("input_name", &self.input_name)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl TextLineDetector {
    /// Load the detection model (det_model.onnx)
    ///
    /// # Errors
    /// Returns error if the model file is missing or ONNX Runtime rejects it
    pub async fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("OCR detection model not found: {}", model_path.display());
        }

        info!("Loading OCR detection model from {}", model_path.display());

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
                "Failed to load OCR detection model from {}",
                model_path.display()
            ))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        debug!("OCR detection model input: {}", input_name);

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            threshold: DEFAULT_LINE_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detect text lines in a region
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<TextLine>> {
        let (input, scale) = preprocess_for_line_detection(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("OCR detection session lock poisoned"))?;

        let input_value = Value::from_array(input).context("Failed to create input tensor")?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .context("Text-line detection inference failed")?;

        let prob_map = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract probability map")?;

        let lines = extract_text_lines(prob_map.view(), self.threshold, &scale)?;
        debug!("Detected {} text lines", lines.len());
        Ok(lines)
    }
}
