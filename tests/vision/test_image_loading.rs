// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Page loading and crop export

use bubble_ocr::vision::detection::save_bubble_crops;
use bubble_ocr::vision::{decode_image_bytes, load_page_image, BoundingBox, BubbleCandidate};
use bubble_ocr::PipelineError;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

fn page() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| {
        Rgb([(x * 4) as u8, (y * 5) as u8, 128])
    }))
}

#[test]
fn test_load_png_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.png");
    page().save(&path).unwrap();

    let loaded = load_page_image(&path).unwrap();
    assert_eq!(loaded.dimensions(), (64, 48));
}

#[test]
fn test_corrupt_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.jpg");
    std::fs::write(&path, [0xFF, 0xD8, 0x00, 0x01, 0x02]).unwrap();

    let err = load_page_image(&path).unwrap_err();
    assert!(matches!(err, PipelineError::ImageLoad { .. }));
    assert!(err.to_string().contains("corrupt.jpg"));
}

#[test]
fn test_decode_in_memory_png() {
    let mut bytes = Vec::new();
    page()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    assert_eq!(decode_image_bytes(&bytes).unwrap().dimensions(), (64, 48));
    assert!(matches!(
        decode_image_bytes(b"nope"),
        Err(PipelineError::ImageLoadBytes(_))
    ));
}

#[test]
fn test_crops_are_numbered_from_one() {
    let dir = tempfile::tempdir().unwrap();
    let candidates = vec![
        BubbleCandidate::new(BoundingBox::new(0, 0, 20, 10), 0, 0.9),
        BubbleCandidate::new(BoundingBox::new(5, 5, 5, 30), 0, 0.9),
        BubbleCandidate::new(BoundingBox::new(40, 20, 100, 100), 2, 0.7),
    ];

    let saved = save_bubble_crops(&page(), &candidates, dir.path());

    assert_eq!(saved, 2);
    let first = image::open(dir.path().join("bubble_1.png")).unwrap();
    assert_eq!(first.dimensions(), (20, 10));
    assert!(!dir.path().join("bubble_2.png").exists());
    // clipped to the page
    let third = image::open(dir.path().join("bubble_3.png")).unwrap();
    assert_eq!(third.dimensions(), (24, 28));
}
