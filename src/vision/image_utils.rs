// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Page image loading

use image::{DynamicImage, ImageFormat};
use std::path::Path;
use tracing::debug;

use crate::errors::PipelineError;

/// Decode a page image from disk
///
/// The format is sniffed from the file contents, not the extension.
///
/// # Errors
/// `PipelineError::ImageLoad` when the file cannot be read or decoded
pub fn load_page_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage, PipelineError> {
    let path = path.as_ref();
    let load_error = |source: image::ImageError| PipelineError::ImageLoad {
        path: path.to_path_buf(),
        source,
    };

    let bytes = std::fs::read(path).map_err(|e| load_error(image::ImageError::IoError(e)))?;
    let image = image::load_from_memory(&bytes).map_err(load_error)?;

    debug!(
        "Loaded page {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Decode raw image bytes
///
/// # Errors
/// `PipelineError::ImageLoadBytes` for empty, unrecognized or corrupted data
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::ImageLoadBytes("image data is empty".to_string()));
    }

    let format = detect_format(bytes)
        .ok_or_else(|| PipelineError::ImageLoadBytes("unsupported image format".to_string()))?;

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| PipelineError::ImageLoadBytes(e.to_string()))
}

/// Detect image format from magic bytes
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(ImageFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some(ImageFormat::WebP),
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Some(ImageFormat::Gif),
        [0x42, 0x4D, ..] => Some(ImageFormat::Bmp),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_detect_format_headers() {
        assert_eq!(
            detect_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            detect_format(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            detect_format(&[0x47, 0x49, 0x46, 0x38, 0x39, 0x61]),
            Some(ImageFormat::Gif)
        );
        assert_eq!(
            detect_format(&[0x52, 0x49, 0x46, 0x46, 0, 0, 0, 0, 0x57, 0x45, 0x42, 0x50]),
            Some(ImageFormat::WebP)
        );
        assert_eq!(detect_format(&[0x00, 0x00, 0x00, 0x00]), None);
        assert_eq!(detect_format(&[0x89]), None);
    }

    #[test]
    fn test_decode_image_bytes_png() {
        let image = decode_image_bytes(&png_bytes(3, 2)).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn test_decode_image_bytes_errors() {
        assert!(matches!(
            decode_image_bytes(&[]),
            Err(PipelineError::ImageLoadBytes(_))
        ));
        assert!(matches!(
            decode_image_bytes(&[0x00, 0x01, 0x02, 0x03]),
            Err(PipelineError::ImageLoadBytes(_))
        ));
        let corrupted = [0x89, 0x50, 0x4E, 0x47, 0x00, 0x00, 0x00, 0x00];
        assert!(decode_image_bytes(&corrupted).unwrap_err().is_image_level());
    }

    #[test]
    fn test_load_page_image_sniffs_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page-without-extension");
        std::fs::write(&path, png_bytes(8, 5)).unwrap();
        let image = load_page_image(&path).unwrap();
        assert_eq!((image.width(), image.height()), (8, 5));
    }

    #[test]
    fn test_load_page_image_missing_file() {
        let err = load_page_image("/nonexistent/page.png").unwrap_err();
        match err {
            PipelineError::ImageLoad { path, .. } => {
                assert_eq!(path, Path::new("/nonexistent/page.png"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_page_image_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"just some text").unwrap();
        assert!(matches!(
            load_page_image(&path),
            Err(PipelineError::ImageLoad { .. })
        ));
    }
}
