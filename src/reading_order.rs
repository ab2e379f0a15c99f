// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Reading-order reconstruction for recognized bubbles
//!
//! Bubbles are ordered by a single scalar `y + alpha * x` over their top-left
//! anchor. This is a heuristic: it favors top-to-bottom flow and only breaks
//! near-ties by horizontal position. It is not a panel-aware layout analysis.

use serde::{Deserialize, Serialize};

/// Weight of the horizontal coordinate in the ordering key
pub const DEFAULT_ALPHA: f64 = 0.5;

/// Text recognized in one bubble, with its box's top-left corner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTextFragment {
    pub text: String,
    /// `(y, x)` of the originating box
    pub anchor: (u32, u32),
}

impl RawTextFragment {
    pub fn new(text: impl Into<String>, anchor: (u32, u32)) -> Self {
        Self {
            text: text.into(),
            anchor,
        }
    }
}

/// Ordering key parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingOrder {
    alpha: f64,
}

impl Default for ReadingOrder {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl ReadingOrder {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Ordering key of an anchor
    pub fn score(&self, anchor: (u32, u32)) -> f64 {
        let (y, x) = anchor;
        y as f64 + self.alpha * x as f64
    }

    /// Indices of `fragments` in reading order
    ///
    /// The sort is stable, so equal keys keep discovery order.
    pub fn order(&self, fragments: &[RawTextFragment]) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..fragments.len()).collect();
        indices.sort_by(|&a, &b| {
            self.score(fragments[a].anchor)
                .total_cmp(&self.score(fragments[b].anchor))
        });
        indices
    }
}

/// Indices of `fragments` in reading order for the given `alpha`
pub fn order(fragments: &[RawTextFragment], alpha: f64) -> Vec<usize> {
    ReadingOrder::new(alpha).order(fragments)
}
