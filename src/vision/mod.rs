// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision stages of the bubble pipeline
//!
//! This module provides:
//! - Speech-bubble detection via a YOLO ONNX model
//! - Region preprocessing (upscaling, sharpening, contrast equalization)
//! - OCR via PaddleOCR
//!
//! All models run on the CPU execution provider.

pub mod detection;
pub mod filters;
pub mod image_utils;
pub mod ocr;
pub mod preprocessing;

pub use detection::{BoundingBox, BubbleCandidate, BubbleDetector, YoloBubbleDetector};
pub use image_utils::{decode_image_bytes, load_page_image};
pub use ocr::{PaddleTextRecognizer, TextRecognizer};
pub use preprocessing::{preprocess, PreprocessOptions};
