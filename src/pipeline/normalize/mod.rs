//! Geometric normalisation: denoise, then deskew.
//!
//! Both steps are best-effort. Each returns a [`NormalizeOutcome`] that either
//! carries the transformed image or hands the input back untouched together
//! with the reason it was left alone. Nothing in here returns an error and
//! panics are caught, so normalisation can never fail a page.
//!
//! The work is CPU-bound and synchronous; the orchestrator runs it on
//! `spawn_blocking`.

pub mod denoise;
pub mod deskew;

use image::DynamicImage;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

pub use denoise::{denoise, denoise_with, NlMeansParams};
pub use deskew::{deskew, estimate_skew, rotate_bicubic, rotation_from_rect_angle};

/// Why a step handed its input back.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Zero-area image or smaller than the filter window.
    TooSmall { width: u32, height: u32 },
    /// Above the pixel budget for non-local means.
    TooLarge { pixels: u64 },
    /// Thresholding found no ink to measure.
    NoForeground,
    /// The measured rotation is too small to be worth resampling.
    NegligibleSkew { angle: f32 },
    /// The step produced a buffer of the wrong size.
    BufferMismatch,
    /// The step panicked.
    Panicked(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooSmall { width, height } => write!(f, "image too small ({width}x{height})"),
            SkipReason::TooLarge { pixels } => write!(f, "image too large ({pixels} px)"),
            SkipReason::NoForeground => f.write_str("no foreground pixels"),
            SkipReason::NegligibleSkew { angle } => write!(f, "negligible skew ({angle:.3}°)"),
            SkipReason::BufferMismatch => f.write_str("output buffer size mismatch"),
            SkipReason::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Result of one best-effort step.
#[derive(Debug, Clone)]
pub enum NormalizeOutcome {
    Transformed(DynamicImage),
    Unchanged(DynamicImage, SkipReason),
}

impl NormalizeOutcome {
    pub fn image(&self) -> &DynamicImage {
        match self {
            NormalizeOutcome::Transformed(img) | NormalizeOutcome::Unchanged(img, _) => img,
        }
    }

    pub fn into_image(self) -> DynamicImage {
        match self {
            NormalizeOutcome::Transformed(img) | NormalizeOutcome::Unchanged(img, _) => img,
        }
    }

    pub fn is_transformed(&self) -> bool {
        matches!(self, NormalizeOutcome::Transformed(_))
    }
}

/// What [`normalize_with_report`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeReport {
    pub denoised: bool,
    /// Rotation applied, in degrees, counter-clockwise positive.
    pub skew_angle: Option<f32>,
    pub skipped: Vec<SkipReason>,
}

/// Run `step` on `image`, turning a panic into `Unchanged(image)`.
pub(crate) fn guarded<F>(image: DynamicImage, step: F) -> NormalizeOutcome
where
    F: FnOnce(&DynamicImage) -> NormalizeOutcome,
{
    match catch_unwind(AssertUnwindSafe(|| step(&image))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            NormalizeOutcome::Unchanged(image, SkipReason::Panicked(msg))
        }
    }
}

/// Denoise then deskew `image`, reporting what happened.
pub fn normalize_with_report(image: DynamicImage) -> (DynamicImage, NormalizeReport) {
    let mut report = NormalizeReport {
        denoised: false,
        skew_angle: None,
        skipped: Vec::new(),
    };

    let image = match denoise(image) {
        NormalizeOutcome::Transformed(img) => {
            report.denoised = true;
            img
        }
        NormalizeOutcome::Unchanged(img, reason) => {
            warn!("Denoise skipped: {}", reason);
            report.skipped.push(reason);
            img
        }
    };

    let (outcome, applied) = deskew::deskew_measured(image);
    let image = match outcome {
        NormalizeOutcome::Transformed(img) => {
            report.skew_angle = applied;
            img
        }
        NormalizeOutcome::Unchanged(img, reason) => {
            debug!("Deskew skipped: {}", reason);
            report.skipped.push(reason);
            img
        }
    };

    (image, report)
}

/// Denoise then deskew `image`. Never fails; worst case returns the input.
pub fn normalize(image: DynamicImage) -> DynamicImage {
    normalize_with_report(image).0
}
