//! DCT perceptual hash.
//!
//! The image is reduced to a 64x64 grayscale thumbnail, transformed with a
//! 2-D DCT-II, and the lowest 8x8 frequencies are compared against their
//! median. Bit 63 holds coefficient (0, 0).

use image::imageops::{self, FilterType};
use image::DynamicImage;
use std::f64::consts::PI;

const SAMPLE: usize = 64;
const BLOCK: usize = 8;

/// Compute the 64-bit perceptual hash of an image.
#[must_use]
pub fn perceptual_hash(img: &DynamicImage) -> u64 {
    let side = u32::try_from(SAMPLE).unwrap_or(64);
    let gray = imageops::resize(&img.to_luma8(), side, side, FilterType::Triangle);
    let pixels: Vec<f64> = gray.pixels().map(|p| f64::from(p.0[0])).collect();

    let block = low_frequencies(&pixels);
    let median = median(&block);

    block
        .iter()
        .enumerate()
        .fold(0u64, |hash, (i, &v)| {
            if v > median {
                hash | 1 << (63 - i)
            } else {
                hash
            }
        })
}

/// First `BLOCK` x `BLOCK` coefficients of the 2-D DCT-II of a
/// `SAMPLE` x `SAMPLE` row-major matrix.
fn low_frequencies(pixels: &[f64]) -> [f64; BLOCK * BLOCK] {
    let mut cos = [[0.0f64; SAMPLE]; BLOCK];
    for (k, row) in cos.iter_mut().enumerate() {
        for (n, c) in row.iter_mut().enumerate() {
            *c = (PI / SAMPLE as f64 * (n as f64 + 0.5) * k as f64).cos();
        }
    }

    // Transform every row, keeping the low frequencies only.
    let mut rows = vec![[0.0f64; BLOCK]; SAMPLE];
    for (y, out) in rows.iter_mut().enumerate() {
        let line = &pixels[y * SAMPLE..(y + 1) * SAMPLE];
        for (k, coef) in out.iter_mut().enumerate() {
            *coef = line.iter().zip(cos[k].iter()).map(|(p, c)| p * c).sum();
        }
    }

    // Then down each of the kept columns.
    let mut block = [0.0f64; BLOCK * BLOCK];
    for x in 0..BLOCK {
        for k in 0..BLOCK {
            block[k * BLOCK + x] = rows
                .iter()
                .zip(cos[k].iter())
                .map(|(row, c)| row[x] * c)
                .sum();
        }
    }
    block
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gradient(width: u32, height: u32, invert: bool) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
            let v = u8::try_from(x * 255 / (width - 1)).unwrap_or(u8::MAX);
            Luma([if invert { 255 - v } else { v }])
        }))
    }

    #[test]
    fn test_same_image_same_hash() {
        let a = gradient(120, 80, false);
        assert_eq!(perceptual_hash(&a), perceptual_hash(&a.clone()));
    }

    #[test]
    fn test_inverted_image_differs() {
        // The first horizontal frequency flips sign, so at least that bit differs.
        let a = perceptual_hash(&gradient(120, 80, false));
        let b = perceptual_hash(&gradient(120, 80, true));
        assert_ne!(a, b);
    }

    #[test]
    fn test_median() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < f64::EPSILON);
        assert!((median(&[4.0, 1.0, 2.0, 3.0]) - 2.5).abs() < f64::EPSILON);
    }
}
