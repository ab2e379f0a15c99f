// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Region preprocessing as the pipeline uses it

use bubble_ocr::vision::preprocessing::{preprocess, PreprocessOptions};
use bubble_ocr::vision::BoundingBox;
use bubble_ocr::PipelineError;
use image::{DynamicImage, GenericImageView, Luma, Rgb, RgbImage};

fn speech_bubble(width: u32, height: u32) -> DynamicImage {
    // white balloon with a dark stroke through the middle
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, y| {
        if y == height / 2 {
            Rgb([20, 20, 20])
        } else {
            Rgb([250, 250, 250])
        }
    }))
}

#[test]
fn test_small_crop_from_page_is_upscaled_to_gray() {
    let page = speech_bubble(300, 200);
    let crop = BoundingBox::new(10, 10, 70, 50).crop(&page);

    let out = preprocess(&crop, &PreprocessOptions::default()).unwrap();

    // min side 40 < 120
    assert_eq!(out.dimensions(), (180, 120));
    assert!(matches!(out, DynamicImage::ImageLuma8(_)));
}

#[test]
fn test_large_crop_keeps_size() {
    let out = preprocess(&speech_bubble(250, 210), &PreprocessOptions::default()).unwrap();
    assert_eq!(out.dimensions(), (250, 210));
}

#[test]
fn test_text_stroke_stays_darker_than_background() {
    let out = preprocess(&speech_bubble(60, 41), &PreprocessOptions::default())
        .unwrap()
        .to_luma8();
    let (w, h) = out.dimensions();
    let Luma([stroke]) = *out.get_pixel(w / 2, h / 2);
    let Luma([background]) = *out.get_pixel(w / 2, 2);
    assert!(stroke < background);
}

#[test]
fn test_letterboxed_output_has_target_size() {
    let options = PreprocessOptions {
        target_yolo_size: Some((640, 640)),
        ..Default::default()
    };
    let out = preprocess(&speech_bubble(300, 150), &options).unwrap();
    assert_eq!(out.dimensions(), (640, 640));
}

#[test]
fn test_zero_area_crop_rejected() {
    let empty = DynamicImage::new_rgb8(0, 12);
    assert!(matches!(
        preprocess(&empty, &PreprocessOptions::default()),
        Err(PipelineError::InvalidRegion { .. })
    ));
}
