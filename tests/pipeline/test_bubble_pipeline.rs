// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end orchestration with fake detector and recognizer

use super::fakes::*;
use bubble_ocr::vision::{BoundingBox, BubbleCandidate};
use bubble_ocr::{PipelineError, PipelineOptions};
use std::sync::Arc;

#[tokio::test]
async fn test_page_without_bubbles_gives_empty_result() {
    let recognizer = Arc::new(SizeKeyedRecognizer::default());
    let pipeline = pipeline(FixedDetector::new(vec![]), recognizer.clone());

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(result.bubble_count(), 0);
    assert_eq!(result.total_word_count(), 0);
    assert_eq!(result.avg_words_per_bubble(), 0.0);
    assert!(recognizer.calls().is_empty());
}

#[tokio::test]
async fn test_bubbles_come_out_in_reading_order() {
    // anchors (y=10, x=50) -> 35.0 and (y=12, x=5) -> 14.5
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[
        ((60, 30), "Second bubble"),
        ((40, 40), "FIRST bubble"),
    ]));
    let pipeline = pipeline(
        FixedDetector::new(vec![bubble(50, 10, 110, 40), bubble(5, 12, 45, 52)]),
        recognizer,
    );

    let result = pipeline
        .process_image(&blank_page(200, 200), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(
        result.ordered_sentences(),
        &["first bubble".to_string(), "second bubble".to_string()]
    );
    assert_eq!(result.bubble_count(), 2);
    assert_eq!(result.total_word_count(), 4);
}

#[tokio::test]
async fn test_output_is_corrected_and_lowercased() {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[((50, 20), "HELLO   frend")]));
    let pipeline = pipeline(FixedDetector::new(vec![bubble(0, 0, 50, 20)]), recognizer);

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(result.ordered_sentences(), &["hello friend".to_string()]);
}

#[tokio::test]
async fn test_degenerate_boxes_never_reach_recognizer() {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[((20, 20), "run")]));
    let pipeline = pipeline(
        FixedDetector::new(vec![
            bubble(30, 30, 30, 60),
            bubble(40, 50, 60, 50),
            bubble(10, 10, 30, 30),
            // entirely outside the page
            bubble(150, 150, 180, 180),
        ]),
        recognizer.clone(),
    );

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(recognizer.calls(), vec![(20, 20)]);
    assert_eq!(result.ordered_sentences(), &["run".to_string()]);
}

#[tokio::test]
async fn test_boxes_are_clipped_to_page() {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[((10, 10), "run")]));
    let pipeline = pipeline(
        FixedDetector::new(vec![bubble(90, 90, 140, 400)]),
        recognizer.clone(),
    );

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(recognizer.calls(), vec![(10, 10)]);
    assert_eq!(result.bubble_count(), 1);
}

#[tokio::test]
async fn test_only_speech_bubble_class_is_read() {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[
        ((30, 30), "hello"),
        ((40, 40), "run"),
    ]));
    let pipeline = pipeline(
        FixedDetector::new(vec![
            BubbleCandidate::new(BoundingBox::new(0, 0, 30, 30), 0, 0.8),
            BubbleCandidate::new(BoundingBox::new(50, 50, 90, 90), 1, 0.95),
        ]),
        recognizer.clone(),
    );

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(recognizer.calls(), vec![(30, 30)]);
    assert_eq!(result.ordered_sentences(), &["hello".to_string()]);
}

#[tokio::test]
async fn test_empty_recognitions_are_dropped() {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[
        ((30, 30), "   "),
        ((40, 40), "run"),
    ]));
    let pipeline = pipeline(
        FixedDetector::new(vec![bubble(0, 0, 30, 30), bubble(50, 50, 90, 90)]),
        recognizer,
    );

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(result.bubble_count(), 1);
}

#[tokio::test]
async fn test_recognition_failure_skips_only_that_region() {
    let recognizer = Arc::new(SizeKeyedRecognizer {
        failing: vec![(30, 30)],
        ..SizeKeyedRecognizer::with_texts(&[((40, 40), "hello friend")])
    });
    let pipeline = pipeline(
        FixedDetector::new(vec![bubble(0, 0, 30, 30), bubble(50, 50, 90, 90)]),
        recognizer.clone(),
    );

    let result = pipeline
        .process_image(&blank_page(100, 100), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(recognizer.calls().len(), 2);
    assert_eq!(result.ordered_sentences(), &["hello friend".to_string()]);
}

#[tokio::test]
async fn test_detector_failure_is_reported() {
    let recognizer = Arc::new(SizeKeyedRecognizer::default());
    let pipeline = pipeline(FailingDetector, recognizer);

    let err = pipeline
        .process_image(&blank_page(100, 100), &PipelineOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Detection(_)));
}

#[tokio::test]
async fn test_saved_crops_cover_every_box() {
    let dir = tempfile::tempdir().unwrap();
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[((30, 30), "hello")]));
    let pipeline = pipeline(
        FixedDetector::new(vec![
            bubble(0, 0, 30, 30),
            BubbleCandidate::new(BoundingBox::new(50, 50, 90, 90), 1, 0.95),
        ]),
        recognizer,
    );
    let options = PipelineOptions {
        save_crops: true,
        crops_dir: dir.path().join("crops"),
        ..size_preserving_options()
    };

    pipeline
        .process_image(&blank_page(100, 100), &options)
        .await
        .unwrap();

    // crops are written before class filtering
    assert!(dir.path().join("crops/bubble_1.png").exists());
    assert!(dir.path().join("crops/bubble_2.png").exists());
}

#[tokio::test]
async fn test_missing_image_is_image_load_error() {
    let recognizer = Arc::new(SizeKeyedRecognizer::default());
    let pipeline = pipeline(FixedDetector::new(vec![]), recognizer);

    let err = pipeline
        .extract_and_correct("/nonexistent/page.png", &PipelineOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ImageLoad { .. }));
    assert!(err.to_string().contains("/nonexistent/page.png"));
}

#[tokio::test]
async fn test_invalid_options_rejected_before_loading() {
    let recognizer = Arc::new(SizeKeyedRecognizer::default());
    let pipeline = pipeline(FixedDetector::new(vec![]), recognizer);
    let mut options = PipelineOptions::default();
    options.preprocess.blur_kernel_size = (2, 3);

    let err = pipeline
        .extract_and_correct("/nonexistent/page.png", &options)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidOptions(_)));
}

#[tokio::test]
async fn test_in_memory_page_is_processed() {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[((50, 20), "HELLO frend")]));
    let pipeline = pipeline(FixedDetector::new(vec![bubble(0, 0, 50, 20)]), recognizer);

    let mut bytes = std::io::Cursor::new(Vec::new());
    blank_page(100, 100)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();

    let result = pipeline
        .process_bytes(bytes.get_ref(), &size_preserving_options())
        .await
        .unwrap();

    assert_eq!(result.ordered_sentences(), &["hello friend".to_string()]);
}

#[tokio::test]
async fn test_undecodable_bytes_fail_as_image_error() {
    let recognizer = Arc::new(SizeKeyedRecognizer::default());
    let pipeline = pipeline(FixedDetector::new(vec![bubble(0, 0, 50, 20)]), recognizer.clone());

    let err = pipeline
        .process_bytes(b"not an image", &size_preserving_options())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ImageLoadBytes(_)));
    assert!(err.is_image_level());
    assert!(recognizer.calls().is_empty());
}

/// Needs real weights; point BUBBLE_OCR_* at them and BUBBLE_OCR_TEST_PAGE at a page
#[tokio::test]
#[ignore]
async fn test_real_models_on_sample_page() {
    let config = bubble_ocr::ComicOcrConfig::from_env().unwrap();
    let page = std::env::var("BUBBLE_OCR_TEST_PAGE").unwrap();
    let pipeline = bubble_ocr::BubblePipeline::load(&config).await.unwrap();

    let result = pipeline
        .extract_and_correct(&page, &config.pipeline)
        .await
        .unwrap();

    assert!(result.bubble_count() > 0);
    for sentence in result.ordered_sentences() {
        assert_eq!(sentence, &sentence.to_lowercase());
    }
}
