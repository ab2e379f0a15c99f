// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cli;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod reading_order;
pub mod text;
pub mod vision;

pub use config::{ComicOcrConfig, GrammarBackend};
pub use errors::PipelineError;
pub use pipeline::{
    BatchReport, BubblePipeline, FailurePolicy, PipelineOptions, PipelineResult,
};
pub use reading_order::{RawTextFragment, ReadingOrder};
pub use text::TextCorrector;
pub use vision::{BoundingBox, BubbleCandidate, BubbleDetector, TextRecognizer};
