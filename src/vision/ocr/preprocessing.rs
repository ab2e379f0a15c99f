// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tensor preparation for the PaddleOCR models

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;

/// Longest side fed to the text-line detector
pub const LINE_DETECTION_MAX_SIDE: u32 = 960;

/// Detector input sides must be multiples of this
pub const LINE_DETECTION_STRIDE: u32 = 32;

/// Recognition model input height (PP-OCR English models use 48)
pub const REC_INPUT_HEIGHT: u32 = 48;

/// Maximum width for recognition model input
pub const REC_MAX_WIDTH: u32 = 320;

/// Minimum width for recognition model input
pub const REC_MIN_WIDTH: u32 = 4;

/// Mean values for normalization (ImageNet)
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Std values for normalization (ImageNet)
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Scale between a region and its detector input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineScale {
    pub scale_x: f32,
    pub scale_y: f32,
}

impl LineScale {
    /// Map a point from detector input space back to the region
    pub fn map_to_region(&self, x: f32, y: f32) -> (f32, f32) {
        (x / self.scale_x, y / self.scale_y)
    }
}

/// Round to the nearest stride multiple, never below one stride
fn snap_to_stride(value: f32) -> u32 {
    let snapped = (value / LINE_DETECTION_STRIDE as f32).round() as u32 * LINE_DETECTION_STRIDE;
    snapped.max(LINE_DETECTION_STRIDE)
}

/// Detector input dimensions for a region of the given size
pub fn line_detection_size(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f32;
    let ratio = if longest > LINE_DETECTION_MAX_SIDE as f32 {
        LINE_DETECTION_MAX_SIDE as f32 / longest
    } else {
        1.0
    };
    (
        snap_to_stride(width as f32 * ratio),
        snap_to_stride(height as f32 * ratio),
    )
}

/// Preprocess a region for text-line detection
///
/// The region is resized (aspect ratio roughly kept) so both sides are stride
/// multiples, then normalized to an NCHW tensor. Returns the scale applied.
pub fn preprocess_for_line_detection(image: &DynamicImage) -> (Array4<f32>, LineScale) {
    let (orig_w, orig_h) = image.dimensions();
    let (new_w, new_h) = line_detection_size(orig_w, orig_h);

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle);
    let tensor = normalize_to_tensor(&resized);

    let scale = LineScale {
        scale_x: new_w as f32 / orig_w.max(1) as f32,
        scale_y: new_h as f32 / orig_h.max(1) as f32,
    };
    (tensor, scale)
}

/// Preprocess a cropped text line for recognition
///
/// Resized to height 48 with dynamic width (aspect ratio preserved, clamped to
/// `REC_MIN_WIDTH..=REC_MAX_WIDTH`).
pub fn preprocess_for_recognition(image: &DynamicImage) -> Array4<f32> {
    let (orig_w, orig_h) = image.dimensions();

    let scale = REC_INPUT_HEIGHT as f32 / orig_h.max(1) as f32;
    let new_width = ((orig_w as f32 * scale).round() as u32).clamp(REC_MIN_WIDTH, REC_MAX_WIDTH);

    let resized = image.resize_exact(new_width, REC_INPUT_HEIGHT, FilterType::Lanczos3);
    normalize_to_tensor(&resized)
}

fn normalize_to_tensor(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    tensor
}
