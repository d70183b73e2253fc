//! Skew estimation and correction.
//!
//! ── Estimation ──
//!
//! The page is binarised with a Gaussian adaptive threshold (ink becomes
//! foreground), every foreground pixel is collected as a `(row, col)` point
//! and the minimum-area rectangle around their convex hull is measured. The
//! rectangle angle is folded into `[-90, 0)` and mapped to a rotation in `(-45, 45]`
//! degrees by [`rotation_from_rect_angle`].
//!
//! ── Correction ──
//!
//! The image is rotated about its centre by that angle (counter-clockwise
//! positive) with bicubic sampling. Canvas size is kept and samples outside
//! the source are taken from the nearest edge pixel, so corners fill with
//! the page background rather than black.

use super::{guarded, NormalizeOutcome, SkipReason};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Rotations smaller than this (degrees) are not applied.
pub const MIN_SKEW_DEGREES: f32 = 0.01;

/// Gaussian sigma of the threshold neighbourhood (an 11x11 block).
const THRESHOLD_SIGMA: f32 = 2.0;

/// Offset subtracted from the local mean.
const THRESHOLD_OFFSET: f32 = 2.0;

/// Bicubic kernel coefficient.
const CUBIC_A: f64 = -0.75;

/// Binarise `gray`: 255 where a pixel is at least `offset` darker than its
/// Gaussian-weighted neighbourhood, 0 elsewhere.
pub fn adaptive_threshold(gray: &GrayImage, sigma: f32, offset: f32) -> GrayImage {
    let mean = gaussian_blur_f32(gray, sigma);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((dst, src), m) in out.pixels_mut().zip(gray.pixels()).zip(mean.pixels()) {
        let foreground = src[0] as f32 <= m[0] as f32 - offset;
        *dst = Luma([if foreground { 255 } else { 0 }]);
    }
    out
}

/// Map a rectangle angle in `[-90, 0)` to the rotation that levels it.
///
/// Angles below -45 mean the rectangle's other edge is the near-horizontal
/// one. The result lies in `(-45, 45]`.
pub fn rotation_from_rect_angle(raw: f32) -> f32 {
    if raw < -45.0 {
        -(90.0 + raw)
    } else {
        -raw
    }
}

/// Angle of the minimum-area rectangle around the convex polygon `hull`,
/// folded into `[-90, 0)`.
///
/// One side of the minimum-area rectangle is collinear with a hull edge, so
/// each edge direction is tried and the angle is taken from that edge, never
/// from rounded rectangle corners.
fn min_area_rect_angle(hull: &[Point<i32>]) -> Option<f32> {
    let n = hull.len();
    let mut best: Option<(f64, f64)> = None;
    for i in 0..n {
        let (a, b) = (hull[i], hull[(i + 1) % n]);
        let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
        let len = dx.hypot(dy);
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = (dx / len, dy / len);
        let (mut lo_u, mut hi_u, mut lo_v, mut hi_v) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for p in hull {
            let (px, py) = (p.x as f64, p.y as f64);
            let u = px * ux + py * uy;
            let v = py * ux - px * uy;
            lo_u = lo_u.min(u);
            hi_u = hi_u.max(u);
            lo_v = lo_v.min(v);
            hi_v = hi_v.max(v);
        }
        let area = (hi_u - lo_u) * (hi_v - lo_v);
        if best.map_or(true, |(min, _)| area < min) {
            best = Some((area, dy.atan2(dx)));
        }
    }
    best.map(|(_, theta)| (theta.to_degrees().rem_euclid(90.0) - 90.0) as f32)
}

/// Measure the rotation, in degrees, that would level the text on `image`.
pub fn estimate_skew(image: &DynamicImage) -> Result<f32, SkipReason> {
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 {
        return Err(SkipReason::TooSmall { width: w, height: h });
    }
    let binary = adaptive_threshold(&image.to_luma8(), THRESHOLD_SIGMA, THRESHOLD_OFFSET);

    let points: Vec<Point<i32>> = binary
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| Point::new(y as i32, x as i32))
        .collect();
    if points.len() < 3 {
        return Err(SkipReason::NoForeground);
    }

    let hull = catch_unwind(AssertUnwindSafe(|| convex_hull(points)))
        .map_err(|_| SkipReason::Panicked("convex hull".to_string()))?;
    let raw = min_area_rect_angle(&hull).ok_or(SkipReason::NoForeground)?;
    Ok(rotation_from_rect_angle(raw))
}

fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Taps and weights for sampling at `pos` along an axis of length `len`.
fn taps(pos: f64, len: usize) -> ([usize; 4], [f64; 4]) {
    let base = pos.floor();
    let frac = pos - base;
    let last = len as i64 - 1;
    let mut idx = [0usize; 4];
    let mut wts = [0f64; 4];
    for k in 0..4 {
        let i = base as i64 - 1 + k as i64;
        idx[k] = i.clamp(0, last) as usize;
        wts[k] = cubic_weight(frac - (k as f64 - 1.0));
    }
    (idx, wts)
}

/// Rotate `image` by `degrees` (counter-clockwise positive) about
/// `(width / 2, height / 2)`, keeping its size and replicating edges.
pub fn rotate_bicubic<P>(image: &ImageBuffer<P, Vec<u8>>, degrees: f64) -> Option<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = (image.width() as usize, image.height() as usize);
    let cn = P::CHANNEL_COUNT as usize;
    let src = image.as_raw();
    let (cx, cy) = ((w / 2) as f64, (h / 2) as f64);
    let (sin, cos) = degrees.to_radians().sin_cos();

    let mut out = vec![0u8; w * h * cn];
    if w == 0 || h == 0 {
        return ImageBuffer::from_raw(w as u32, h as u32, out);
    }
    out.par_chunks_mut(w * cn).enumerate().for_each(|(y, row)| {
        let dy = y as f64 - cy;
        let mut acc = [0f64; 4];
        for x in 0..w {
            let dx = x as f64 - cx;
            let sx = cos * dx - sin * dy + cx;
            let sy = sin * dx + cos * dy + cy;
            let (xi, xw) = taps(sx, w);
            let (yi, yw) = taps(sy, h);
            acc[..cn].iter_mut().for_each(|a| *a = 0.0);
            for (j, &ry) in yi.iter().enumerate() {
                let row_off = ry * w;
                for (i, &rx) in xi.iter().enumerate() {
                    let weight = yw[j] * xw[i];
                    let s = (row_off + rx) * cn;
                    for c in 0..cn {
                        acc[c] += weight * src[s + c] as f64;
                    }
                }
            }
            for c in 0..cn {
                row[x * cn + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    ImageBuffer::from_raw(w as u32, h as u32, out)
}

fn rotate_dynamic(image: &DynamicImage, degrees: f64) -> Option<DynamicImage> {
    match image {
        DynamicImage::ImageLuma8(gray) => rotate_bicubic(gray, degrees).map(DynamicImage::ImageLuma8),
        DynamicImage::ImageRgba8(rgba) => rotate_bicubic(rgba, degrees).map(DynamicImage::ImageRgba8),
        other => rotate_bicubic(&other.to_rgb8(), degrees).map(DynamicImage::ImageRgb8),
    }
}

/// Estimate and remove skew from `image`.
pub fn deskew(image: DynamicImage) -> NormalizeOutcome {
    deskew_measured(image).0
}

/// [`deskew`], also returning the rotation applied when there was one.
pub(crate) fn deskew_measured(image: DynamicImage) -> (NormalizeOutcome, Option<f32>) {
    let mut applied = None;
    let outcome = guarded(image, |img| {
        let angle = match estimate_skew(img) {
            Ok(angle) => angle,
            Err(reason) => return NormalizeOutcome::Unchanged(img.clone(), reason),
        };
        if angle.abs() < MIN_SKEW_DEGREES {
            return NormalizeOutcome::Unchanged(img.clone(), SkipReason::NegligibleSkew { angle });
        }
        match rotate_dynamic(img, angle as f64) {
            Some(rotated) => {
                applied = Some(angle);
                NormalizeOutcome::Transformed(rotated)
            }
            None => NormalizeOutcome::Unchanged(img.clone(), SkipReason::BufferMismatch),
        }
    });
    let applied = if outcome.is_transformed() { applied } else { None };
    (outcome, applied)
}
