// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Region preprocessing for OCR
//!
//! Turns a cropped bubble into an image the recognizer reads well:
//! 1. Optional grayscale conversion
//! 2. Adaptive upscaling of small crops (cubic resize, blur, unsharp mask)
//! 3. Local contrast equalization, bilateral smoothing and closing (grayscale only)
//! 4. Optional letterbox to a detector input size
//! 5. Optional debug snapshots

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::filters::{bilateral_filter, clahe, gaussian_blur, morphological_close, unsharp_mask};
use crate::errors::PipelineError;

/// Crops whose shorter side is below this are upscaled
pub const UPSCALE_TRIGGER_PX: u32 = 100;

/// Shorter side below this gets the strong factor
pub const SMALL_REGION_PX: u32 = 120;

/// Longer side above this gets the light factor
pub const LARGE_REGION_PX: u32 = 200;

pub const STRONG_SCALE_FACTOR: f32 = 3.0;
pub const LIGHT_SCALE_FACTOR: f32 = 1.5;

pub const CLAHE_CLIP_LIMIT: f32 = 2.0;
pub const CLAHE_TILE_GRID: (u32, u32) = (8, 8);

pub const BILATERAL_DIAMETER: u32 = 9;
pub const BILATERAL_SIGMA_COLOR: f32 = 75.0;
pub const BILATERAL_SIGMA_SPACE: f32 = 75.0;

pub const CLOSING_KERNEL: (u32, u32) = (1, 1);

/// Debug snapshot of the blurred upscale stage
pub const DEBUG_BLURRED_FILE: &str = "debug_blurred.png";

/// Debug snapshot of the final preprocessed region
pub const DEBUG_PREPROCESSED_FILE: &str = "debug_preprocessed.png";

/// Preprocessing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Convert to single-channel luminance
    pub grayscale: bool,
    /// Upscale crops smaller than `UPSCALE_TRIGGER_PX`
    pub upscale: bool,
    /// Factor used for mid-sized crops
    pub scale_factor: f32,
    /// Gaussian kernel `(width, height)`, both odd
    pub blur_kernel_size: (u32, u32),
    /// Gaussian sigma; 0 derives it from the kernel size
    pub blur_sigma_x: f32,
    /// Letterbox the result to this `(width, height)`
    pub target_yolo_size: Option<(u32, u32)>,
    /// Write intermediate stages to `debug_dir`
    pub save_debug: bool,
    /// Directory for debug snapshots
    pub debug_dir: PathBuf,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            grayscale: true,
            upscale: true,
            scale_factor: 2.0,
            blur_kernel_size: (3, 3),
            blur_sigma_x: 0.0,
            target_yolo_size: None,
            save_debug: false,
            debug_dir: PathBuf::from("."),
        }
    }
}

impl PreprocessOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<(), PipelineError> {
        let (kw, kh) = self.blur_kernel_size;
        if kw == 0 || kh == 0 || kw % 2 == 0 || kh % 2 == 0 {
            return Err(PipelineError::InvalidOptions(format!(
                "blur kernel size must be odd and positive, got {}x{}",
                kw, kh
            )));
        }
        if !(self.blur_sigma_x >= 0.0) {
            return Err(PipelineError::InvalidOptions(format!(
                "blur sigma must be >= 0, got {}",
                self.blur_sigma_x
            )));
        }
        if !(self.scale_factor > 0.0) {
            return Err(PipelineError::InvalidOptions(format!(
                "scale factor must be > 0, got {}",
                self.scale_factor
            )));
        }
        if let Some((w, h)) = self.target_yolo_size {
            if w == 0 || h == 0 {
                return Err(PipelineError::InvalidOptions(format!(
                    "target size must be non-zero, got {}x{}",
                    w, h
                )));
            }
        }
        Ok(())
    }
}

/// Pick an upscale factor from the crop's own size
pub fn adaptive_scale_factor(width: u32, height: u32, default_factor: f32) -> f32 {
    if width.min(height) < SMALL_REGION_PX {
        STRONG_SCALE_FACTOR
    } else if width.max(height) > LARGE_REGION_PX {
        LIGHT_SCALE_FACTOR
    } else {
        default_factor
    }
}

/// Adaptive upscale followed by Gaussian blur and unsharp masking
pub fn upscale_for_ocr(image: &DynamicImage, options: &PreprocessOptions) -> DynamicImage {
    let (width, height) = image.dimensions();
    let factor = adaptive_scale_factor(width, height, options.scale_factor);
    let new_w = ((width as f32 * factor) as u32).max(1);
    let new_h = ((height as f32 * factor) as u32).max(1);

    debug!(
        "Upscaling {}x{} region by {:.1} to {}x{}",
        width, height, factor, new_w, new_h
    );

    let upscaled = image.resize_exact(new_w, new_h, FilterType::CatmullRom);
    let blurred = gaussian_blur(&upscaled, options.blur_kernel_size, options.blur_sigma_x);

    if options.save_debug {
        save_debug_image(&blurred, &options.debug_dir, DEBUG_BLURRED_FILE);
    }

    unsharp_mask(&blurred, options.blur_kernel_size, options.blur_sigma_x)
}

/// CLAHE, bilateral smoothing and closing on a grayscale region
pub fn enhance_contrast(gray: &GrayImage) -> GrayImage {
    let equalized = clahe(gray, CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID);
    let smoothed = bilateral_filter(
        &equalized,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    );
    morphological_close(&smoothed, CLOSING_KERNEL)
}

/// Resize to fit `target` preserving aspect ratio, centered on a zero canvas
pub fn resize_for_detector(image: &DynamicImage, target: (u32, u32)) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_w, target_h) = target;

    let scale = (target_w as f32 / width as f32).min(target_h as f32 / height as f32);
    let new_w = ((width as f32 * scale) as u32).clamp(1, target_w);
    let new_h = ((height as f32 * scale) as u32).clamp(1, target_h);
    let offset_x = ((target_w - new_w) / 2) as i64;
    let offset_y = ((target_h - new_h) / 2) as i64;

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle);

    match resized {
        DynamicImage::ImageLuma8(gray) => {
            let mut canvas = GrayImage::from_pixel(target_w, target_h, Luma([0]));
            image::imageops::replace(&mut canvas, &gray, offset_x, offset_y);
            DynamicImage::ImageLuma8(canvas)
        }
        other => {
            let mut canvas = RgbImage::from_pixel(target_w, target_h, Rgb([0, 0, 0]));
            image::imageops::replace(&mut canvas, &other.to_rgb8(), offset_x, offset_y);
            DynamicImage::ImageRgb8(canvas)
        }
    }
}

/// Preprocess a cropped region for OCR
///
/// # Errors
/// Returns `InvalidRegion` for a zero-area crop.
pub fn preprocess(
    crop: &DynamicImage,
    options: &PreprocessOptions,
) -> Result<DynamicImage, PipelineError> {
    let (width, height) = crop.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidRegion {
            x1: 0,
            y1: 0,
            x2: width,
            y2: height,
        });
    }

    let mut img = if options.grayscale {
        DynamicImage::ImageLuma8(crop.to_luma8())
    } else {
        crop.clone()
    };

    if options.upscale && width.min(height) < UPSCALE_TRIGGER_PX {
        img = upscale_for_ocr(&img, options);
    }

    if options.grayscale {
        img = DynamicImage::ImageLuma8(enhance_contrast(&img.to_luma8()));
    }

    if let Some(target) = options.target_yolo_size {
        img = resize_for_detector(&img, target);
    }

    if options.save_debug {
        save_debug_image(&img, &options.debug_dir, DEBUG_PREPROCESSED_FILE);
    }

    Ok(img)
}

fn save_debug_image(image: &DynamicImage, dir: &Path, file_name: &str) {
    let path = dir.join(file_name);
    if let Err(e) = image.save(&path) {
        warn!("Failed to write debug image {}: {}", path.display(), e);
    }
}
