// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Speech-bubble region detection
//!
//! A pretrained YOLO detector (exported to ONNX) finds candidate regions on a
//! comic page. The caller keeps only the speech-bubble class; everything else is
//! discarded before cropping.

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Square input size expected by the bubble detector
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// Class label of "speech bubble" in the detector's label set
pub const SPEECH_BUBBLE_CLASS: usize = 0;

/// Letterbox background (matches the value the detector was trained with)
const LETTERBOX_FILL: u8 = 114;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Axis-aligned box in page pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from float corner coordinates, clipped to `width` x `height`.
    ///
    /// Coordinates are truncated toward zero after clipping.
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let clip = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                return 0;
            }
            v.clamp(0.0, max as f32) as u32
        };
        Self {
            x1: clip(x1, width),
            y1: clip(y1, height),
            x2: clip(x2, width),
            y2: clip(y2, height),
        }
    }

    /// Clip the box to image extents
    pub fn clipped(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        }
    }

    /// True when the box has no area (`x1 >= x2` or `y1 >= y2`)
    pub fn is_degenerate(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Top-left corner as `(y, x)`, the anchor used for reading order
    pub fn anchor(&self) -> (u32, u32) {
        (self.y1, self.x1)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x_left = self.x1.max(other.x1);
        let y_top = self.y1.max(other.y1);
        let x_right = self.x2.min(other.x2);
        let y_bottom = self.y2.min(other.y2);

        if x_right <= x_left || y_bottom <= y_top {
            return 0.0;
        }

        let intersection = (x_right - x_left) as u64 * (y_bottom - y_top) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f32 / union as f32
    }

    /// Crop this region out of `image`
    pub fn crop(&self, image: &DynamicImage) -> DynamicImage {
        image.crop_imm(self.x1, self.y1, self.width(), self.height())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// A detected region with its class label
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleCandidate {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

impl BubbleCandidate {
    pub fn new(bbox: BoundingBox, class_id: usize, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }
}

/// Region detection capability
///
/// Implementations return zero or more labelled boxes in page coordinates.
/// An empty result is valid and distinct from a failure.
pub trait BubbleDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BubbleCandidate>>;
}

/// Scale and padding applied when letterboxing a page into the detector input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from detector input space back to page space
    pub fn map_to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `image` into a `size` x `size` canvas, preserving aspect ratio
/// and centering it on a gray background.
pub fn letterbox(image: &DynamicImage, size: u32) -> (RgbImage, Letterbox) {
    let (orig_w, orig_h) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));

    if orig_w == 0 || orig_h == 0 {
        return (
            canvas,
            Letterbox {
                scale: 1.0,
                pad_x: 0.0,
                pad_y: 0.0,
            },
        );
    }

    let scale = (size as f32 / orig_w as f32).min(size as f32 / orig_h as f32);
    let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, size);

    let resized = image
        .resize_exact(new_w, new_h, FilterType::Triangle)
        .to_rgb8();

    let offset_x = (size - new_w) / 2;
    let offset_y = (size - new_h) / 2;
    image::imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: offset_x as f32,
            pad_y: offset_y as f32,
        },
    )
}

/// Convert an RGB canvas to an NCHW tensor scaled to [0, 1]
pub fn to_input_tensor(rgb: &RgbImage) -> Array4<f32> {
    let (w, h) = rgb.dimensions();
    let mut tensor = Array4::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Decode raw detector output into page-space candidates.
///
/// Two layouts are accepted:
/// - `[1, 4 + classes, boxes]`: box centre/size followed by class scores
/// - `[1, boxes, 5 + classes]`: box centre/size, objectness, class scores
///
/// The layout is picked from the shape: the box axis is always the longer one.
pub fn decode_predictions(
    output: ArrayViewD<f32>,
    letterbox: &Letterbox,
    page_size: (u32, u32),
    confidence_threshold: f32,
) -> Result<Vec<BubbleCandidate>> {
    let shape = output.shape();
    if shape.len() != 3 {
        anyhow::bail!("Unexpected detector output shape: {:?}", shape);
    }
    if shape[0] == 0 || shape[1] == 0 || shape[2] == 0 {
        return Ok(Vec::new());
    }

    let channels_first = shape[1] < shape[2];
    let (num_boxes, num_outputs) = if channels_first {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    let class_offset = if channels_first { 4 } else { 5 };
    if num_outputs <= class_offset {
        anyhow::bail!(
            "Invalid detector output: expected more than {} values per box, got {}",
            class_offset,
            num_outputs
        );
    }
    let num_classes = num_outputs - class_offset;

    let value = |i: usize, k: usize| -> f32 {
        if channels_first {
            output[IxDyn(&[0, k, i])]
        } else {
            output[IxDyn(&[0, i, k])]
        }
    };

    let (page_w, page_h) = page_size;
    let mut candidates = Vec::new();

    for i in 0..num_boxes {
        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for c in 0..num_classes {
            let score = value(i, class_offset + c);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        let confidence = if channels_first {
            best_score
        } else {
            value(i, 4) * best_score
        };
        if confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        let (x1, y1) = letterbox.map_to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.map_to_original(cx + w / 2.0, cy + h / 2.0);
        let bbox = BoundingBox::from_xyxy(x1, y1, x2, y2, page_w, page_h);

        candidates.push(BubbleCandidate::new(bbox, best_class, confidence));
    }

    Ok(candidates)
}

/// Per-class non-maximum suppression; returns survivors by descending confidence
pub fn non_maximum_suppression(
    mut candidates: Vec<BubbleCandidate>,
    iou_threshold: f32,
) -> Vec<BubbleCandidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = vec![true; candidates.len()];
    for i in 0..candidates.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..candidates.len() {
            if !keep[j] || candidates[i].class_id != candidates[j].class_id {
                continue;
            }
            if candidates[i].bbox.iou(&candidates[j].bbox) > iou_threshold {
                keep[j] = false;
            }
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(candidate, kept)| kept.then_some(candidate))
        .collect()
}

/// Write every candidate's crop to `output_dir/bubble_<n>.png` (n from 1).
///
/// Returns the number of crops written. Individual write failures are logged.
pub fn save_bubble_crops(
    image: &DynamicImage,
    candidates: &[BubbleCandidate],
    output_dir: &Path,
) -> usize {
    if let Err(e) = fs::create_dir_all(output_dir) {
        warn!(
            "Could not create crop directory {}: {}",
            output_dir.display(),
            e
        );
        return 0;
    }

    let (page_w, page_h) = image.dimensions();
    let mut saved = 0;
    for (i, candidate) in candidates.iter().enumerate() {
        let bbox = candidate.bbox.clipped(page_w, page_h);
        if bbox.is_degenerate() {
            debug!("Skipping crop {} with zero area {}", i + 1, bbox);
            continue;
        }
        let path = output_dir.join(format!("bubble_{}.png", i + 1));
        match bbox.crop(image).save(&path) {
            Ok(()) => saved += 1,
            Err(e) => warn!("Failed to save crop {}: {}", path.display(), e),
        }
    }
    saved
}

/// YOLO speech-bubble detector running on ONNX Runtime (CPU)
#[derive(Clone)]
pub struct YoloBubbleDetector {
    /// ONNX Runtime session (thread-safe)
    session: Arc<Mutex<Session>>,
    /// Model input name
    input_name: String,
    /// Square input size
    input_size: u32,
    /// Minimum confidence for a box to be kept
    confidence_threshold: f32,
    /// IoU above which overlapping same-class boxes are suppressed
    iou_threshold: f32,
}

impl std::fmt::Debug for YoloBubbleDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloBubbleDetector")
            .field("input_name", &self.input_name)
            .field("input_size", &self.input_size)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("iou_threshold", &self.iou_threshold)
            .finish_non_exhaustive()
    }
}

impl YoloBubbleDetector {
    /// Load the detector from an ONNX file
    ///
    /// # Errors
    /// Returns error if the model file is missing or ONNX Runtime rejects it.
    pub async fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("Bubble detector model not found: {}", model_path.display());
        }

        info!("Loading bubble detector from {}", model_path.display());

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
                "Failed to load bubble detector from {}",
                model_path.display()
            ))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        debug!("Bubble detector input: {}", input_name);
        info!("Bubble detector loaded (CPU-only)");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            input_size: DETECTOR_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Set the confidence threshold for detections
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the IoU threshold used by non-maximum suppression
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }
}

impl BubbleDetector for YoloBubbleDetector {
    #[instrument(level = "debug", skip_all)]
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BubbleCandidate>> {
        let page_size = image.dimensions();
        let (canvas, letterbox) = letterbox(image, self.input_size);
        let input = to_input_tensor(&canvas);

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("Bubble detector session lock poisoned"))?;

        let input_value = Value::from_array(input).context("Failed to create input tensor")?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .context("Bubble detection inference failed")?;

        let output_tensor = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract detector output")?;
        debug!("Detector output shape: {:?}", output_tensor.shape());

        let candidates = decode_predictions(
            output_tensor.view(),
            &letterbox,
            page_size,
            self.confidence_threshold,
        )?;
        let candidates = non_maximum_suppression(candidates, self.iou_threshold);

        debug!("Detected {} candidate regions", candidates.len());
        Ok(candidates)
    }
}
