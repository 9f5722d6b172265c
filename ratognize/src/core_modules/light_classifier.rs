// THEORY:
// The `LightClassifier` decides which ambient-light regime a frame was recorded
// under. Paint colors look different under day and night lighting, so this
// decision selects which half of the color database the marker passes use.
//
// Key architectural principles:
// 1.  **Two Independent Signals**: A whole-frame brightness vote (one vote per
//     channel whose mean exceeds a fixed threshold) and the presence of a blob of
//     the indicator light's color near its known position.
// 2.  **Decision Table, Not Score**: The two signals combine through a fixed table.
//     Agreement yields DAY or NIGHT. Disagreement yields one of two anomalous
//     states, EXTRA (bright, no indicator) and STRANGE (dark, indicator on).
// 3.  **Pure Decision**: `decide` has no state. Change detection against the last
//     known state, and the color-model reload it triggers, belong to the frame
//     orchestrator that owns that state.

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, RgbImage, imageops};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate_mut, erode_mut};

use crate::config::LightConfig;
use crate::core_modules::blob_extractor::max_component_area;
use crate::core_modules::color_filter::filter_hsv_into;
use crate::core_modules::hsv::HsvImage;
use crate::error::ReplayError;

const INDICATOR_CLEANUP_RADIUS: u8 = 2;
const DAY_VOTES_REQUIRED: u32 = 2; // day-ness score needed to call a frame bright

/// Ambient-light regime of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightState {
    #[default]
    Uninitialized,
    Day,
    Night,
    /// Bright frame without the indicator light.
    Extra,
    /// Dark frame with the indicator light on.
    Strange,
}

impl LightState {
    /// Name used in log files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZEDLIGHT",
            Self::Day => "DAYLIGHT",
            Self::Night => "NIGHTLIGHT",
            Self::Extra => "EXTRALIGHT",
            Self::Strange => "STRANGELIGHT",
        }
    }

    /// The state whose color database is used for this state.
    pub fn color_source(self) -> Option<Self> {
        match self {
            Self::Day | Self::Extra => Some(Self::Day),
            Self::Night | Self::Strange => Some(Self::Night),
            Self::Uninitialized => None,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LightState {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNINITIALIZEDLIGHT" => Ok(Self::Uninitialized),
            "DAYLIGHT" => Ok(Self::Day),
            "NIGHTLIGHT" => Ok(Self::Night),
            "EXTRALIGHT" => Ok(Self::Extra),
            "STRANGELIGHT" => Ok(Self::Strange),
            other => Err(ReplayError::UnknownLight(other.to_string())),
        }
    }
}

/// Raw measurements a light decision is based on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightReading {
    /// Whole-frame channel means as (R, G, B).
    pub average: [f64; 3],
    /// Number of channels brighter than their threshold (0..=3).
    pub votes: u32,
    /// Largest indicator-colored blob area near the indicator position.
    pub max_blob_area: f64,
}

/// Combines the brightness vote and the indicator blob into a light state.
pub fn decide(enabled: bool, votes: u32, indicator_area: f64, min_indicator_area: f64) -> LightState {
    if !enabled {
        return LightState::Night;
    }
    let indicator_on = indicator_area >= min_indicator_area;
    let bright = votes >= DAY_VOTES_REQUIRED;
    match (indicator_on, bright) {
        (true, true) => LightState::Day,
        (true, false) => LightState::Strange,
        (false, false) => LightState::Night,
        (false, true) => LightState::Extra,
    }
}

/// Samples frames for the indicator light and overall brightness.
#[derive(Debug, Clone)]
pub struct LightClassifier {
    config: LightConfig,
    /// Top-left corner of the processed region in full-frame coordinates.
    roi_origin: (u32, u32),
}

impl LightClassifier {
    pub fn new(config: LightConfig, roi_origin: (u32, u32)) -> Self {
        Self { config, roi_origin }
    }

    pub fn config(&self) -> &LightConfig {
        &self.config
    }

    /// True when this frame is due for a light check.
    pub fn is_due(&self, frame: u64) -> bool {
        self.config.enabled
            && (frame < self.config.warmup_frames || frame % self.config.skip_factor.max(1) == 0)
    }

    /// Measures brightness votes and indicator blob size.
    pub fn read(&self, frame: &RgbImage, hsv: &HsvImage) -> LightReading {
        // --- 1. Whole-frame brightness vote ---
        let average = channel_means(frame);
        let votes = average
            .iter()
            .zip(self.config.vote_thresholds)
            .filter(|(mean, threshold)| **mean > *threshold)
            .count() as u32;

        // --- 2. Indicator blob near its known position ---
        let half = i64::from(self.config.sample_size / 2);
        let x = (i64::from(self.config.position.0) - i64::from(self.roi_origin.0) - half).max(0) as u32;
        let y = (i64::from(self.config.position.1) - i64::from(self.roi_origin.1) - half).max(0) as u32;
        let sample = imageops::crop_imm(hsv, x, y, self.config.sample_size, self.config.sample_size).to_image();

        let max_blob_area = if sample.width() == 0 || sample.height() == 0 {
            0.0
        } else {
            let mut mask = GrayImage::new(sample.width(), sample.height());
            filter_hsv_into(&sample, &self.config.color, &mut mask);
            dilate_mut(&mut mask, Norm::LInf, INDICATOR_CLEANUP_RADIUS);
            erode_mut(&mut mask, Norm::LInf, INDICATOR_CLEANUP_RADIUS);
            max_component_area(&mask)
        };

        LightReading { average, votes, max_blob_area }
    }

    /// Turns a reading into a light state.
    pub fn classify(&self, reading: &LightReading) -> LightState {
        decide(self.config.enabled, reading.votes, reading.max_blob_area, self.config.min_blob_area)
    }
}

fn channel_means(frame: &RgbImage) -> [f64; 3] {
    let mut sums = [0.0f64; 3];
    for p in frame.pixels() {
        for c in 0..3 {
            sums[c] += f64::from(p.0[c]);
        }
    }
    let count = f64::from(frame.width()) * f64::from(frame.height());
    sums.map(|s| s / count)
}
