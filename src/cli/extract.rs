// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

use crate::config::{ComicOcrConfig, GrammarBackend};
use crate::pipeline::{BatchReport, BubblePipeline, FailurePolicy};

/// Arguments for the extract command
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Page images to process, in order
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "BUBBLE_OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bubble detector weights (ONNX)
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Grammar backend (rules/languagetool)
    #[arg(long)]
    pub grammar: Option<GrammarBackend>,

    /// Save every detected region as bubble_<n>.png
    #[arg(long)]
    pub save_crops: bool,

    /// Directory for saved crops
    #[arg(long)]
    pub crops_dir: Option<PathBuf>,

    /// Skip upscaling of small crops
    #[arg(long)]
    pub no_upscale: bool,

    /// Upscale factor for mid-sized crops
    #[arg(long)]
    pub scale_factor: Option<f32>,

    /// Gaussian blur kernel as WxH, e.g. 3x3
    #[arg(long, value_parser = parse_kernel)]
    pub blur_kernel: Option<(u32, u32)>,

    /// Gaussian blur sigma (0 derives it from the kernel)
    #[arg(long)]
    pub blur_sigma: Option<f32>,

    /// Write intermediate preprocessing images to the working directory
    #[arg(long)]
    pub save_debug: bool,

    /// Stop at the first unreadable image
    #[arg(long)]
    pub fail_fast: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the show-config command
#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    /// TOML configuration file
    #[arg(long, env = "BUBBLE_OCR_CONFIG")]
    pub config: Option<PathBuf>,
}

fn parse_kernel(value: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {}", value))?;
    let w = w.trim().parse().map_err(|_| format!("bad kernel width: {}", w))?;
    let h = h.trim().parse().map_err(|_| format!("bad kernel height: {}", h))?;
    Ok((w, h))
}

fn load_config(path: Option<&PathBuf>) -> Result<ComicOcrConfig> {
    let mut config = match path {
        Some(path) => ComicOcrConfig::from_file(path)?,
        None => ComicOcrConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

impl ExtractArgs {
    /// Fold command-line flags into the loaded configuration
    pub fn apply_to(&self, config: &mut ComicOcrConfig) {
        if let Some(path) = &self.model_path {
            config.models.detector = path.clone();
        }
        let pipeline = &mut config.pipeline;
        if self.save_crops {
            pipeline.save_crops = true;
        }
        if let Some(dir) = &self.crops_dir {
            pipeline.crops_dir = dir.clone();
        }

        let preprocess = &mut pipeline.preprocess;
        if self.no_upscale {
            preprocess.upscale = false;
        }
        if let Some(factor) = self.scale_factor {
            preprocess.scale_factor = factor;
        }
        if let Some(kernel) = self.blur_kernel {
            preprocess.blur_kernel_size = kernel;
        }
        if let Some(sigma) = self.blur_sigma {
            preprocess.blur_sigma_x = sigma;
        }
        if self.save_debug {
            preprocess.save_debug = true;
        }

        if let Some(backend) = self.grammar {
            config.grammar.backend = backend;
        }
    }

    fn policy(&self) -> FailurePolicy {
        if self.fail_fast {
            FailurePolicy::Abort
        } else {
            FailurePolicy::SkipFailed
        }
    }
}

/// Run the pipeline over every image and print the report
pub async fn extract(args: ExtractArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    args.apply_to(&mut config);
    config.validate()?;

    info!("Loading models");
    let pipeline = BubblePipeline::load(&config).await?;
    let report = pipeline
        .run_batch(&args.images, &config.pipeline, args.policy())
        .await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", render_report(&report));
    }

    if report.results.is_empty() && report.has_failures() {
        return Err(anyhow!("No page could be processed"));
    }
    Ok(())
}

/// Print the effective configuration
pub fn show_config(args: ShowConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    print!("{}", text);
    Ok(())
}

/// Human-readable report: per-page bubbles followed by a summary
pub fn render_report(report: &BatchReport) -> String {
    let mut out = String::new();

    for page in &report.results {
        let sentences = page.result.ordered_sentences();
        let _ = writeln!(out, "\nProcessing: {}", page.path.display());
        let _ = writeln!(out, "Extracted {} text bubbles:", sentences.len());
        let _ = writeln!(out, "{}", "-".repeat(30));
        for (i, text) in sentences.iter().enumerate() {
            let _ = writeln!(out, "Bubble {}: {}", i + 1, text);
        }
    }

    for failure in &report.failures {
        let _ = writeln!(out, "\nSkipped: {} ({})", failure.path.display(), failure.error);
    }

    let _ = writeln!(out, "\nSUMMARY:");
    let _ = writeln!(out, "Total bubbles: {}", report.total_bubbles());
    let _ = writeln!(out, "Total words: {}", report.total_words());
    let _ = writeln!(
        out,
        "Average words per bubble: {:.1}",
        report.avg_words_per_bubble()
    );
    out
}
