// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for model locations, correction backends and run options
//!
//! Loaded from a TOML file, then overridden from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::pipeline::PipelineOptions;
use crate::text::LanguageToolConfig;

/// Where model artifacts live on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    /// Bubble detector weights (ONNX)
    pub detector: PathBuf,
    /// Directory holding `det_model.onnx`, `rec_model.onnx` and `en_dict.txt`
    pub ocr_dir: PathBuf,
    /// Token-classification model directory; entity protection is off when unset
    pub ner_dir: Option<PathBuf>,
    /// Word-frequency list (`.json`, `.json.gz` or `word count` text)
    pub spelling_dictionary: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/bubble-detector.onnx"),
            ocr_dir: PathBuf::from("models/paddleocr"),
            ner_dir: None,
            spelling_dictionary: PathBuf::from("models/en.json.gz"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Grammar checking backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrammarBackend {
    /// Built-in rules, no external process
    #[default]
    Rules,
    LanguageTool,
}

impl std::str::FromStr for GrammarBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "languagetool" | "language_tool" => Ok(Self::LanguageTool),
            other => Err(PipelineError::InvalidOptions(format!(
                "unknown grammar backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    pub backend: GrammarBackend,
    pub language_tool: LanguageToolConfig,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComicOcrConfig {
    pub models: ModelPaths,
    pub detector: DetectorConfig,
    pub grammar: GrammarConfig,
    pub pipeline: PipelineOptions,
}

impl ComicOcrConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides using `lookup` for variable values
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BUBBLE_OCR_MODEL_PATH") {
            self.models.detector = PathBuf::from(v);
        }
        if let Some(v) = lookup("BUBBLE_OCR_OCR_DIR") {
            self.models.ocr_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BUBBLE_OCR_NER_DIR") {
            self.models.ner_dir = if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Some(v) = lookup("BUBBLE_OCR_SPELLING_DICT") {
            self.models.spelling_dictionary = PathBuf::from(v);
        }
        if let Some(v) = lookup("BUBBLE_OCR_GRAMMAR") {
            self.grammar.backend = v.parse()?;
        }
        if let Some(v) = lookup("LANGUAGETOOL_URL") {
            self.grammar.language_tool.server_url = Some(v);
        }
        if let Some(v) = lookup("LANGUAGETOOL_JAR") {
            self.grammar.language_tool.jar_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("BUBBLE_OCR_SAVE_CROPS") {
            self.pipeline.save_crops = parse_flag(&v)
                .with_context(|| format!("Invalid BUBBLE_OCR_SAVE_CROPS value: {}", v))?;
        }
        if let Some(v) = lookup("BUBBLE_OCR_CROPS_DIR") {
            self.pipeline.crops_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let detector = &self.detector;
        if !(0.0..=1.0).contains(&detector.confidence_threshold) {
            return Err(PipelineError::InvalidOptions(format!(
                "confidence_threshold must be in [0, 1], got {}",
                detector.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&detector.iou_threshold) {
            return Err(PipelineError::InvalidOptions(format!(
                "iou_threshold must be in [0, 1], got {}",
                detector.iou_threshold
            )));
        }
        if self.grammar.backend == GrammarBackend::LanguageTool {
            self.grammar.language_tool.validate()?;
        }
        self.pipeline.validate()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ComicOcrConfig::default();
        assert_eq!(config.grammar.backend, GrammarBackend::Rules);
        assert_eq!(config.models.ocr_dir, PathBuf::from("models/paddleocr"));
        assert!(config.models.ner_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[models]
ner_dir = "models/ner"

[grammar]
backend = "language_tool"

[grammar.language_tool]
server_url = "http://localhost:8010"

[pipeline]
save_crops = true
reading_order_alpha = 0.25

[pipeline.preprocess]
scale_factor = 2.0
"#
        )
        .unwrap();

        let config = ComicOcrConfig::from_file(file.path()).unwrap();
        assert_eq!(config.models.ner_dir, Some(PathBuf::from("models/ner")));
        assert_eq!(config.grammar.backend, GrammarBackend::LanguageTool);
        assert!(config.pipeline.save_crops);
        assert_eq!(config.pipeline.reading_order_alpha, 0.25);
        assert_eq!(config.pipeline.preprocess.scale_factor, 2.0);
        // untouched sections keep defaults
        assert_eq!(config.detector, DetectorConfig::default());
        assert!(config.pipeline.preprocess.grayscale);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ComicOcrConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: ComicOcrConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BUBBLE_OCR_MODEL_PATH", "/models/yolo.onnx"),
            ("BUBBLE_OCR_GRAMMAR", "languagetool"),
            ("LANGUAGETOOL_URL", "http://lt:8081"),
            ("BUBBLE_OCR_SAVE_CROPS", "yes"),
            ("BUBBLE_OCR_CROPS_DIR", "/tmp/crops"),
        ]
        .into_iter()
        .collect();

        let mut config = ComicOcrConfig::default();
        config
            .apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.models.detector, PathBuf::from("/models/yolo.onnx"));
        assert_eq!(config.grammar.backend, GrammarBackend::LanguageTool);
        assert_eq!(
            config.grammar.language_tool.server_url.as_deref(),
            Some("http://lt:8081")
        );
        assert!(config.pipeline.save_crops);
        assert_eq!(config.pipeline.crops_dir, PathBuf::from("/tmp/crops"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_detector_path_from_toml() {
        let config: ComicOcrConfig = toml::from_str(
            r#"
[models]
detector = "weights/bubbles.onnx"
"#,
        )
        .unwrap();
        assert_eq!(config.models.detector, PathBuf::from("weights/bubbles.onnx"));
        assert_eq!(config.pipeline, PipelineOptions::default());

        // run options no longer carry model locations
        let stray: ComicOcrConfig = toml::from_str(
            r#"
[pipeline]
model_path = "ignored.onnx"
"#,
        )
        .unwrap();
        assert_eq!(stray.models.detector, ModelPaths::default().detector);
    }

    #[test]
    fn test_bad_env_values_rejected() {
        let mut config = ComicOcrConfig::default();
        assert!(config
            .apply_overrides_from(|k| (k == "BUBBLE_OCR_GRAMMAR").then(|| "grammarly".to_string()))
            .is_err());
        assert!(config
            .apply_overrides_from(|k| (k == "BUBBLE_OCR_SAVE_CROPS").then(|| "maybe".to_string()))
            .is_err());
    }

    #[test]
    fn test_language_tool_requires_endpoint() {
        let mut config = ComicOcrConfig::default();
        config.grammar.backend = GrammarBackend::LanguageTool;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_kernel_rejected() {
        let mut config = ComicOcrConfig::default();
        config.pipeline.preprocess.blur_kernel_size = (4, 5);
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_thresholds_checked() {
        let mut config = ComicOcrConfig::default();
        config.detector.iou_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
