// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the bubble-to-text pipeline
//!
//! Failures fall into three groups:
//! - Image-level errors (decode failures) that end one page's run
//! - Region-level errors that are logged and skipped by the orchestrator
//! - Resource errors (model or correction resources) that are fatal to a batch

use std::path::PathBuf;

use thiserror::Error;

use crate::vision::detection::BoundingBox;

/// Errors surfaced by the pipeline and its stages
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source image path unreadable or undecodable
    #[error("Could not load image at {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// In-memory image data could not be decoded
    #[error("Could not decode image data: {0}")]
    ImageLoadBytes(String),

    /// Degenerate (zero-area) region handed to a region stage
    #[error("Invalid region ({x1}, {y1}, {x2}, {y2}): zero area")]
    InvalidRegion { x1: u32, y1: u32, x2: u32, y2: u32 },

    /// OCR engine failure for a single region
    #[error("OCR failed on bubble at {region}: {source}")]
    Recognition {
        region: BoundingBox,
        #[source]
        source: anyhow::Error,
    },

    /// Grammar, spelling or NLP resource could not be initialized
    #[error("Correction unavailable ({stage}): {reason}")]
    CorrectionUnavailable { stage: &'static str, reason: String },

    /// Model weights failed to load
    #[error("Failed to load {model} model: {source}")]
    ModelLoad {
        model: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Page-level detector inference failed
    #[error("Bubble detection failed: {0}")]
    Detection(#[source] anyhow::Error),

    /// Configuration rejected by validation
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl PipelineError {
    /// Build an `InvalidRegion` error from a box
    pub fn invalid_region(bbox: &BoundingBox) -> Self {
        Self::InvalidRegion {
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
        }
    }

    /// Short stage name for logs and reports
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ImageLoad { .. } | Self::ImageLoadBytes(_) => "image_load",
            Self::InvalidRegion { .. } => "region",
            Self::Recognition { .. } => "recognition",
            Self::CorrectionUnavailable { stage, .. } => stage,
            Self::ModelLoad { .. } => "model_load",
            Self::Detection(_) => "detection",
            Self::InvalidOptions(_) => "options",
        }
    }

    /// Whether the batch runner may skip this error and continue with the next image
    pub fn is_image_level(&self) -> bool {
        matches!(self, Self::ImageLoad { .. } | Self::ImageLoadBytes(_))
    }
}
