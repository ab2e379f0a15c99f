// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Multi-page runs and failure policies

use super::fakes::*;
use bubble_ocr::{FailurePolicy, PipelineError};
use std::sync::Arc;

fn greeting_pipeline() -> bubble_ocr::BubblePipeline {
    let recognizer = Arc::new(SizeKeyedRecognizer::with_texts(&[((40, 20), "hello friend")]));
    pipeline(FixedDetector::new(vec![bubble(10, 10, 50, 30)]), recognizer)
}

#[tokio::test]
async fn test_broken_page_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_page(dir.path(), "page1.png");
    let broken = dir.path().join("page2.png");
    std::fs::write(&broken, b"definitely not a png").unwrap();
    let third = write_page(dir.path(), "page3.png");

    let report = greeting_pipeline()
        .run_batch(
            &[first.clone(), broken.clone(), third.clone()],
            &size_preserving_options(),
            FailurePolicy::SkipFailed,
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].path, first);
    assert_eq!(report.results[1].path, third);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, broken);
    assert_eq!(report.total_bubbles(), 2);
    assert_eq!(report.total_words(), 4);
    assert!((report.avg_words_per_bubble() - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_abort_policy_stops_at_broken_page() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_page(dir.path(), "page1.png");
    let missing = dir.path().join("missing.png");

    let err = greeting_pipeline()
        .run_batch(
            &[first, missing],
            &size_preserving_options(),
            FailurePolicy::Abort,
        )
        .await
        .unwrap_err();

    assert!(err.is_image_level());
}

#[tokio::test]
async fn test_detector_failure_ends_batch_even_when_skipping() {
    let dir = tempfile::tempdir().unwrap();
    let page = write_page(dir.path(), "page1.png");
    let recognizer = Arc::new(SizeKeyedRecognizer::default());
    let pipeline = pipeline(FailingDetector, recognizer);

    let err = pipeline
        .run_batch(&[page], &size_preserving_options(), FailurePolicy::SkipFailed)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Detection(_)));
}

#[test]
fn test_report_serializes_for_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let page = write_page(dir.path(), "page1.png");

    let report = tokio_test::block_on(greeting_pipeline().run_batch(
        &[page],
        &size_preserving_options(),
        FailurePolicy::SkipFailed,
    ))
    .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["results"][0]["result"]["orderedSentences"][0], "hello friend");
    assert_eq!(json["results"][0]["result"]["bubbleCount"], 1);
    assert!(json["failures"].as_array().unwrap().is_empty());
}
