// THEORY:
// The `MotionFilter` separates moving animals from the static enclosure by
// comparing each frame against a slowly adapting background model.
//
// Key architectural principles:
// 1.  **Running Average**: The background is an exponential moving average of all
//     frames seen so far, kept in floating point so slow changes are not lost to
//     8-bit rounding. It is seeded with the first frame.
// 2.  **Difference Before Update**: The current frame is compared against the
//     model as it was before this frame was blended in.
// 3.  **Channel Combination**: Per-channel absolute differences are combined into
//     one grayscale difference. The saturating sum is the default; the per-pixel
//     maximum is kept as an alternative for scenes with different lighting.
// 4.  **Cleanup**: The thresholded difference is dilated and then eroded so the
//     fragments of one moving body merge into a single region.
// 5.  **Stateful**: This is the only low-level stage that remembers previous
//     frames. The accumulator lives until `reset` is called.

use image::{GrayImage, Rgb, Rgb32FImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate_mut, erode_mut};
use serde::Deserialize;

use crate::config::MotionConfig;

const MASK_ON: u8 = 255;

/// How per-channel differences are merged into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferencePolicy {
    /// Saturating sum of the three channel differences.
    #[default]
    Sum,
    /// Largest of the three channel differences.
    Max,
}

impl DifferencePolicy {
    fn combine(self, d: [u8; 3]) -> u8 {
        match self {
            Self::Sum => d[0].saturating_add(d[1]).saturating_add(d[2]),
            Self::Max => d[0].max(d[1]).max(d[2]),
        }
    }
}

/// Background-difference motion detector.
#[derive(Debug)]
pub struct MotionFilter {
    accumulator: Option<Rgb32FImage>,
    alpha: f32,
    threshold: u8,
    dilate: u8,
    erode: u8,
    policy: DifferencePolicy,
}

impl MotionFilter {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            accumulator: None,
            alpha: config.alpha,
            threshold: config.threshold,
            dilate: config.dilate,
            erode: config.erode,
            policy: config.policy,
        }
    }

    /// Forgets the background model. The next frame seeds it again.
    pub fn reset(&mut self) {
        self.accumulator = None;
    }

    /// The current background model, if seeded.
    pub fn background(&self) -> Option<&Rgb32FImage> {
        self.accumulator.as_ref()
    }

    /// Computes the motion mask of `frame` and blends it into the background.
    pub fn apply(&mut self, frame: &RgbImage) -> GrayImage {
        let mut mask = GrayImage::new(frame.width(), frame.height());

        if self.accumulator.as_ref().is_some_and(|acc| acc.dimensions() != frame.dimensions()) {
            self.accumulator = None;
        }
        let accumulator = self.accumulator.get_or_insert_with(|| seed(frame));

        // --- 1. Difference against the model, then update it ---
        let keep = 1.0 - self.alpha;
        for ((src, acc), dst) in frame.pixels().zip(accumulator.pixels_mut()).zip(mask.pixels_mut()) {
            let mut diff = [0u8; 3];
            for c in 0..3 {
                let background = acc.0[c].round().clamp(0.0, 255.0) as u8;
                diff[c] = src.0[c].abs_diff(background);
                acc.0[c] = keep * acc.0[c] + self.alpha * f32::from(src.0[c]);
            }

            // --- 2. Combine and binarize ---
            dst.0[0] = if self.policy.combine(diff) > self.threshold { MASK_ON } else { 0 };
        }

        // --- 3. Consolidate fragments ---
        dilate_mut(&mut mask, Norm::LInf, self.dilate);
        erode_mut(&mut mask, Norm::LInf, self.erode);
        mask
    }
}

fn seed(frame: &RgbImage) -> Rgb32FImage {
    Rgb32FImage::from_fn(frame.width(), frame.height(), |x, y| {
        Rgb(frame.get_pixel(x, y).0.map(f32::from))
    })
}
