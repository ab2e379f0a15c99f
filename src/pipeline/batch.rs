// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Multi-page runs sharing one set of loaded services

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{BubblePipeline, PipelineOptions, PipelineResult};
use crate::errors::PipelineError;

/// What to do when a page cannot be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record unreadable pages and continue with the rest
    #[default]
    SkipFailed,
    /// Stop at the first failing page
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub path: PathBuf,
    pub result: PipelineResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Results of a batch, in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<PageReport>,
    pub failures: Vec<PageFailure>,
}

impl BatchReport {
    pub fn total_bubbles(&self) -> usize {
        self.results.iter().map(|p| p.result.bubble_count()).sum()
    }

    pub fn total_words(&self) -> usize {
        self.results.iter().map(|p| p.result.total_word_count()).sum()
    }

    /// Words per bubble across every successful page
    pub fn avg_words_per_bubble(&self) -> f64 {
        let bubbles = self.total_bubbles();
        if bubbles == 0 {
            0.0
        } else {
            self.total_words() as f64 / bubbles as f64
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl BubblePipeline {
    /// Process `paths` sequentially with the already loaded services
    ///
    /// Under `SkipFailed` only image-level errors are recorded and skipped;
    /// resource errors still end the batch.
    pub async fn run_batch<P: AsRef<Path>>(
        &self,
        paths: &[P],
        options: &PipelineOptions,
        policy: FailurePolicy,
    ) -> Result<BatchReport, PipelineError> {
        options.validate()?;

        let mut report = BatchReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.extract_and_correct(path, options).await {
                Ok(result) => report.results.push(PageReport {
                    path: path.to_path_buf(),
                    result,
                }),
                Err(e) if policy == FailurePolicy::SkipFailed && e.is_image_level() => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.failures.push(PageFailure {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Batch finished: {} pages ok, {} failed, {} bubbles",
            report.results.len(),
            report.failures.len(),
            report.total_bubbles()
        );
        Ok(report)
    }
}
