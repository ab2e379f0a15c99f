// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Raster filters used by region preprocessing
//!
//! Kernel sizes, sigma derivation and border handling follow the OpenCV
//! conventions the detector/OCR models were tuned against.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel};
use imageproc::filter::separable_filter;
use imageproc::morphology::{grayscale_close, Mask};

/// Fixed kernels OpenCV uses for small odd sizes when sigma is not given
const SMALL_GAUSSIAN_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[
        0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
    ],
];

/// 1-D Gaussian kernel of `size` taps.
///
/// A non-positive `sigma` is derived from the size as
/// `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let size = size.max(1) as usize;

    if sigma <= 0.0 && size % 2 == 1 && size <= 7 {
        return SMALL_GAUSSIAN_KERNELS[size / 2].to_vec();
    }

    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size as f32 - 1.0) * 0.5;
    let scale = -0.5 / (sigma * sigma);

    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Gaussian blur with an explicit `(width, height)` kernel.
///
/// The same sigma is used on both axes; zero derives it per axis from the
/// kernel size. Grayscale input stays grayscale, anything else is blurred as RGB.
pub fn gaussian_blur(image: &DynamicImage, kernel_size: (u32, u32), sigma_x: f32) -> DynamicImage {
    let h_kernel = gaussian_kernel(kernel_size.0, sigma_x);
    let v_kernel = gaussian_kernel(kernel_size.1, sigma_x);

    match image {
        DynamicImage::ImageLuma8(gray) => {
            DynamicImage::ImageLuma8(separable_filter(gray, &h_kernel, &v_kernel))
        }
        other => {
            let rgb = other.to_rgb8();
            DynamicImage::ImageRgb8(separable_filter(&rgb, &h_kernel, &v_kernel))
        }
    }
}

/// Per-subpixel `alpha * a + beta * b + gamma`, saturated to `[0, 255]`
pub fn add_weighted<P>(
    a: &ImageBuffer<P, Vec<u8>>,
    alpha: f32,
    b: &ImageBuffer<P, Vec<u8>>,
    beta: f32,
    gamma: f32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    debug_assert_eq!(a.dimensions(), b.dimensions());

    let mut out = a.clone();
    for (o, (&x, &y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        let v = alpha * x as f32 + beta * y as f32 + gamma;
        *o = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Sharpen a blurred image: `1.5 * image - 0.5 * gaussian(image)`
pub fn unsharp_mask(image: &DynamicImage, kernel_size: (u32, u32), sigma_x: f32) -> DynamicImage {
    let reblurred = gaussian_blur(image, kernel_size, sigma_x);
    match (image, &reblurred) {
        (DynamicImage::ImageLuma8(a), DynamicImage::ImageLuma8(b)) => {
            DynamicImage::ImageLuma8(add_weighted(a, 1.5, b, -0.5, 0.0))
        }
        _ => {
            let a = image.to_rgb8();
            let b = reblurred.to_rgb8();
            DynamicImage::ImageRgb8(add_weighted(&a, 1.5, &b, -0.5, 0.0))
        }
    }
}

/// Reflect index into `[0, n)` without repeating the edge sample
fn reflect_101(i: i64, n: u32) -> u32 {
    let n = n as i64;
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as u32
}

/// Contrast-limited adaptive histogram equalization
///
/// The image is split into `tiles.0` x `tiles.1` tiles (padding by reflection
/// when it does not divide evenly). Each tile's histogram is clipped at
/// `clip_limit * tile_area / 256`, the excess spread evenly across bins, and
/// pixels are mapped by bilinear interpolation between the four nearest tile
/// lookup tables.
pub fn clahe(image: &GrayImage, clip_limit: f32, tiles: (u32, u32)) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let tiles_x = tiles.0.max(1);
    let tiles_y = tiles.1.max(1);

    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);
    let tile_area = (tile_w * tile_h) as f32;

    let limit = if clip_limit > 0.0 {
        ((clip_limit * tile_area / 256.0) as u32).max(1)
    } else {
        u32::MAX
    };
    let lut_scale = 255.0 / tile_area;

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0u32; 256];
            for y in (ty * tile_h)..((ty + 1) * tile_h) {
                let sy = reflect_101(y as i64, height);
                for x in (tx * tile_w)..((tx + 1) * tile_w) {
                    let sx = reflect_101(x as i64, width);
                    hist[image.get_pixel(sx, sy)[0] as usize] += 1;
                }
            }

            if limit != u32::MAX {
                let mut excess = 0u32;
                for h in hist.iter_mut() {
                    if *h > limit {
                        excess += *h - limit;
                        *h = limit;
                    }
                }
                let redistribute = excess / 256;
                let residual = excess - redistribute * 256;
                for h in hist.iter_mut() {
                    *h += redistribute;
                }
                if residual > 0 {
                    let step = (256 / residual).max(1) as usize;
                    for h in hist.iter_mut().step_by(step).take(residual as usize) {
                        *h += 1;
                    }
                }
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut sum = 0u32;
            for (i, h) in hist.iter().enumerate() {
                sum += h;
                lut[i] = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let tyf = y as f32 / tile_h as f32 - 0.5;
        let ty1 = tyf.floor() as i64;
        let ya = tyf - ty1 as f32;
        let ty2 = (ty1 + 1).min(tiles_y as i64 - 1) as u32;
        let ty1 = ty1.max(0) as u32;

        for x in 0..width {
            let txf = x as f32 / tile_w as f32 - 0.5;
            let tx1 = txf.floor() as i64;
            let xa = txf - tx1 as f32;
            let tx2 = (tx1 + 1).min(tiles_x as i64 - 1) as u32;
            let tx1 = tx1.max(0) as u32;

            let v = image.get_pixel(x, y)[0] as usize;
            let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;

            let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
            let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
            let value = top * (1.0 - ya) + bottom * ya;

            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Edge-preserving bilateral filter over a `diameter` x `diameter` window
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    // window must be odd for a centered neighbourhood
    let window = diameter.max(1) | 1;
    imageproc::filter::bilateral_filter(image, window, sigma_color, sigma_space)
}

/// Largest kernel side a morphology mask accepts
const MAX_MORPH_KERNEL: u32 = 511;

/// Rectangular structuring element anchored at its center
fn rect_mask(kernel: (u32, u32)) -> Mask {
    let kw = kernel.0.clamp(1, MAX_MORPH_KERNEL);
    let kh = kernel.1.clamp(1, MAX_MORPH_KERNEL);
    let shape = GrayImage::from_pixel(kw, kh, Luma([255]));
    Mask::from_image(&shape, (kw / 2) as u8, (kh / 2) as u8)
}

/// Grayscale morphological closing (dilate, then erode) with a rectangular kernel
pub fn morphological_close(image: &GrayImage, kernel: (u32, u32)) -> GrayImage {
    if kernel.0 <= 1 && kernel.1 <= 1 {
        return image.clone();
    }
    grayscale_close(image, &rect_mask(kernel))
}
