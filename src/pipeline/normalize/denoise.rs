//! Non-local means denoising for scan speckle.
//!
//! Every output pixel is a weighted mean of the pixels in its search window,
//! weighted by how similar their surrounding template patches are. Patch
//! distances for one search offset are computed for the whole image at once
//! from an integral image of squared differences, so each offset costs
//! `O(width * height)` regardless of template size.

use super::{guarded, NormalizeOutcome, SkipReason};
use image::{DynamicImage, ImageBuffer, Pixel};
use rayon::prelude::*;

/// Images above this many pixels are left alone.
pub const MAX_DENOISE_PIXELS: u64 = 16_000_000;

/// Filter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlMeansParams {
    /// Filter strength. Larger removes more noise and more detail.
    pub h: f32,
    /// Side of the square patch compared around each pixel. Odd.
    pub template_window: u32,
    /// Side of the square area searched for similar patches. Odd.
    pub search_window: u32,
}

impl Default for NlMeansParams {
    fn default() -> Self {
        Self {
            h: 10.0,
            template_window: 7,
            search_window: 21,
        }
    }
}

/// Denoise with the default parameters.
pub fn denoise(image: DynamicImage) -> NormalizeOutcome {
    denoise_with(image, NlMeansParams::default())
}

/// Denoise with explicit parameters.
///
/// Grayscale images stay grayscale; everything else is filtered as RGB8.
pub fn denoise_with(image: DynamicImage, params: NlMeansParams) -> NormalizeOutcome {
    guarded(image, |img| {
        let (w, h) = (img.width(), img.height());
        if w < params.template_window || h < params.template_window {
            return NormalizeOutcome::Unchanged(
                img.clone(),
                SkipReason::TooSmall { width: w, height: h },
            );
        }
        let pixels = w as u64 * h as u64;
        if pixels > MAX_DENOISE_PIXELS {
            return NormalizeOutcome::Unchanged(img.clone(), SkipReason::TooLarge { pixels });
        }

        let filtered = match img {
            DynamicImage::ImageLuma8(gray) => nl_means(gray, &params).map(DynamicImage::ImageLuma8),
            other => nl_means(&other.to_rgb8(), &params).map(DynamicImage::ImageRgb8),
        };
        match filtered {
            Some(out) => NormalizeOutcome::Transformed(out),
            None => NormalizeOutcome::Unchanged(img.clone(), SkipReason::BufferMismatch),
        }
    })
}

/// Copy `src` into a buffer grown by `pad` pixels on every side, replicating edges.
fn pad_replicate(src: &[u8], w: usize, h: usize, cn: usize, pad: usize) -> Vec<u8> {
    let pw = w + 2 * pad;
    let ph = h + 2 * pad;
    let mut out = vec![0u8; pw * ph * cn];
    out.par_chunks_mut(pw * cn).enumerate().for_each(|(py, row)| {
        let sy = py.saturating_sub(pad).min(h - 1);
        for px in 0..pw {
            let sx = px.saturating_sub(pad).min(w - 1);
            let s = (sy * w + sx) * cn;
            row[px * cn..(px + 1) * cn].copy_from_slice(&src[s..s + cn]);
        }
    });
    out
}

fn nl_means<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    params: &NlMeansParams,
) -> Option<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = (image.width() as usize, image.height() as usize);
    let cn = P::CHANNEL_COUNT as usize;
    let tr = (params.template_window / 2) as usize;
    let sr = (params.search_window / 2) as usize;
    let pad = tr + sr;
    let pw = w + 2 * pad;
    let padded = pad_replicate(image.as_raw(), w, h, cn, pad);

    // Squared differences are taken over a region that extends `tr` past the
    // image on every side so each pixel's template fits. Region coordinate q
    // is padded coordinate q + sr.
    let rw = w + 2 * tr;
    let rh = h + 2 * tr;
    let iw = rw + 1;
    let mut integral = vec![0u64; iw * (rh + 1)];

    let template_area = ((2 * tr + 1) * (2 * tr + 1)) as f64;
    let inv_h2 = 1.0 / (params.h as f64 * params.h as f64 * cn as f64);
    let mut weight_sum = vec![0f64; w * h];
    let mut value_sum = vec![0f64; w * h * cn];
    let side = 2 * tr + 1;

    for dy in 0..=2 * sr {
        for dx in 0..=2 * sr {
            // Row prefix sums of squared differences against the shifted image.
            integral[iw..]
                .par_chunks_mut(iw)
                .enumerate()
                .for_each(|(qy, row)| {
                    let a_row = (qy + sr) * pw;
                    let b_row = (qy + dy) * pw;
                    let mut acc = 0u64;
                    row[0] = 0;
                    for qx in 0..rw {
                        let a = (a_row + qx + sr) * cn;
                        let b = (b_row + qx + dx) * cn;
                        for c in 0..cn {
                            let d = padded[a + c] as i32 - padded[b + c] as i32;
                            acc += (d * d) as u64;
                        }
                        row[qx + 1] = acc;
                    }
                });
            // Column accumulation turns row prefixes into a summed-area table.
            for y in 2..=rh {
                let (prev, cur) = integral.split_at_mut(y * iw);
                let prev = &prev[(y - 1) * iw..];
                for (c, p) in cur[..iw].iter_mut().zip(prev.iter()) {
                    *c += *p;
                }
            }

            let integral = &integral;
            let padded = &padded;
            weight_sum
                .par_chunks_mut(w)
                .zip(value_sum.par_chunks_mut(w * cn))
                .enumerate()
                .for_each(|(y, (ws, vs))| {
                    let top = y * iw;
                    let bottom = (y + side) * iw;
                    let n_row = (y + tr + dy) * pw;
                    for x in 0..w {
                        let ssd = integral[bottom + x + side] + integral[top + x]
                            - integral[top + x + side]
                            - integral[bottom + x];
                        let dist = ssd as f64 / template_area;
                        let weight = (-dist * inv_h2).exp();
                        ws[x] += weight;
                        let n = (n_row + x + tr + dx) * cn;
                        for c in 0..cn {
                            vs[x * cn + c] += weight * padded[n + c] as f64;
                        }
                    }
                });
        }
    }

    let mut out = vec![0u8; w * h * cn];
    out.par_chunks_mut(cn)
        .enumerate()
        .for_each(|(i, px)| {
            let wsum = weight_sum[i];
            for c in 0..cn {
                px[c] = (value_sum[i * cn + c] / wsum).round().clamp(0.0, 255.0) as u8;
            }
        });
    ImageBuffer::from_raw(w as u32, h as u32, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};

    fn speckled(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            // Deterministic salt-and-pepper on a mid-grey field.
            if (x * 7 + y * 13) % 29 == 0 {
                Luma([255])
            } else if (x * 11 + y * 3) % 31 == 0 {
                Luma([0])
            } else {
                Luma([128])
            }
        })
    }

    fn deviation(img: &GrayImage) -> f64 {
        img.pixels()
            .map(|p| (p[0] as f64 - 128.0).abs())
            .sum::<f64>()
            / (img.width() * img.height()) as f64
    }

    #[test]
    fn constant_image_is_a_fixed_point() {
        let img = GrayImage::from_pixel(24, 18, Luma([77]));
        let out = denoise(DynamicImage::ImageLuma8(img.clone()));
        assert!(out.is_transformed());
        assert_eq!(out.into_image().to_luma8(), img);
    }

    #[test]
    fn speckle_is_reduced() {
        let img = speckled(48, 40);
        let before = deviation(&img);
        let out = denoise(DynamicImage::ImageLuma8(img)).into_image().to_luma8();
        assert!(deviation(&out) < before, "{} !< {}", deviation(&out), before);
    }

    #[test]
    fn colour_input_keeps_dimensions_and_becomes_rgb() {
        let img = RgbImage::from_fn(20, 16, |x, _| Rgb([(x * 10) as u8, 40, 200]));
        let out = denoise(DynamicImage::ImageRgb8(img)).into_image();
        assert_eq!((out.width(), out.height()), (20, 16));
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn rgba_is_filtered_as_rgb() {
        let img = RgbaImage::from_pixel(10, 10, image::Rgba([1, 2, 3, 255]));
        let out = denoise(DynamicImage::ImageRgba8(img)).into_image();
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!(out.to_rgb8().get_pixel(5, 5), &Rgb([1, 2, 3]));
    }

    #[test]
    fn smaller_than_template_is_unchanged() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(6, 40));
        match denoise(img) {
            NormalizeOutcome::Unchanged(_, SkipReason::TooSmall { width, height }) => {
                assert_eq!((width, height), (6, 40));
            }
            other => panic!("expected TooSmall, got {other:?}"),
        }
    }

    #[test]
    fn pad_replicate_copies_edges() {
        // 2x1 image [10, 20] padded by 1.
        let out = pad_replicate(&[10, 20], 2, 1, 1, 1);
        assert_eq!(out, vec![10, 10, 20, 20, 10, 10, 20, 20, 10, 10, 20, 20]);
    }
}
