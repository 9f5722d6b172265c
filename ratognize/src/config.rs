// THEORY:
// `PipelineConfig` gathers every tunable of the engine in one place: detection
// windows, morphology radii, motion and light-check parameters, the processed
// region of interest and the historical color database. It is read from a TOML
// document, with every field optional and defaulting to the values the
// experiment was calibrated with.
//
// Validation happens once, at load time, so the per-frame code can trust the
// values it is given.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core_modules::color_filter::ColorSpec;
use crate::core_modules::color_model::{ColorModel, ColorModelEntry, ColorSet, MAX_MARKERS, SelectionMethod};
use crate::core_modules::motion_filter::DifferencePolicy;
use crate::datetime::parse_timestamp;
use crate::error::{ColorModelError, ConfigError, PipelineError};

const ROI_ALIGNMENT: u32 = 8; // processed region edges must be multiples of this

/// Top-level configuration of a pipeline run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub motion: MotionConfig,
    pub light: LightConfig,
    /// Region of interest `[x, y, width, height]`; the whole frame if absent.
    pub roi: Option<Roi>,
    pub colors: ColorConfig,
    pub output: OutputConfig,
}

/// Blob detection windows and morphology.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Number of animals in the enclosure.
    pub creature_count: usize,
    /// Number of colored dots painted on each animal.
    pub chips_per_marker: u32,
    /// Smallest expected marker dot diameter in pixels.
    pub marker_diameter_min: f64,
    /// Largest expected marker dot diameter in pixels.
    pub marker_diameter_max: f64,
    /// Largest accepted marker elongation (major / minor axis).
    pub elongation_max: f64,
    /// Disambiguate blob headings from skew and write markers as full-ellipse
    /// `BLOBE` records.
    pub ellipse_blobs: bool,
    pub erode_blob: u8,
    pub dilate_blob: u8,
    pub erode_creature: u8,
    pub dilate_creature: u8,
    /// Direction of the vertical image axis used for skew projection (+1 or -1).
    pub y_axis_sign: f64,
    /// Odd Gaussian aperture applied to each frame before conversion; 0 is off.
    pub gauss_smoothing: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            creature_count: 28,
            chips_per_marker: 3,
            marker_diameter_min: 10.0,
            marker_diameter_max: 50.0,
            elongation_max: 10.0,
            ellipse_blobs: false,
            erode_blob: 2,
            dilate_blob: 2,
            erode_creature: 4,
            dilate_creature: 6,
            y_axis_sign: 1.0,
            gauss_smoothing: 0,
        }
    }
}

impl DetectionConfig {
    /// Marker blob area window derived from the dot diameters.
    pub fn marker_area_range(&self) -> (f64, f64) {
        let area = |d: f64| d * d / 4.0 * PI;
        (area(self.marker_diameter_min), area(self.marker_diameter_max))
    }
}

/// Motion detection parameters. The area window also bounds whole-animal blobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub enabled: bool,
    /// Blend rate of the running background average.
    pub alpha: f32,
    /// Combined channel difference above which a pixel is moving.
    pub threshold: u8,
    pub area_min: f64,
    pub area_max: f64,
    pub dilate: u8,
    pub erode: u8,
    pub policy: DifferencePolicy,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 0.1,
            threshold: 15,
            area_min: 5000.0,
            area_max: 10000.0,
            dilate: 6,
            erode: 4,
            policy: DifferencePolicy::Sum,
        }
    }
}

/// Indicator light and brightness vote parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub enabled: bool,
    /// Indicator position in full-frame pixel coordinates.
    pub position: (u32, u32),
    pub color: ColorSpec,
    pub min_blob_area: f64,
    /// Check every n-th frame once warm-up is over.
    pub skip_factor: u64,
    /// Frames at the start of a video that are always checked.
    pub warmup_frames: u64,
    /// Edge length of the square sampled around the indicator.
    pub sample_size: u32,
    /// Per-channel (R, G, B) mean brightness above which a channel votes "day".
    pub vote_thresholds: [f64; 3],
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            position: (0, 0),
            color: ColorSpec::default(),
            min_blob_area: 50.0,
            skip_factor: 1,
            warmup_frames: 50,
            sample_size: 200,
            vote_thresholds: [111.0, 100.0, 80.0],
        }
    }
}

/// A rectangular region of the input frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[u32; 4]")]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<[u32; 4]> for Roi {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Self { x, y, width, height }
    }
}

/// One marker color slot.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkerSlot {
    pub name: String,
    #[serde(default = "enabled")]
    pub used: bool,
}

fn enabled() -> bool {
    true
}

/// One calibration record of the color database as written in the config.
#[derive(Debug, Clone, Deserialize)]
pub struct ColorEntryConfig {
    pub day: i32,
    pub timestamp: Option<String>,
    pub markers: Vec<ColorSpec>,
    pub background: ColorSpec,
}

/// Marker slots and the historical color database.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub method: SelectionMethod,
    /// Days since the last repaint; derived from paint dates when absent.
    pub days_since_last_paint: Option<i32>,
    pub markers: Vec<MarkerSlot>,
    pub day: Vec<ColorEntryConfig>,
    pub night: Vec<ColorEntryConfig>,
}

/// Which output files a run produces.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write the per-frame `.blobs` file.
    pub blobs: bool,
    /// Write the `.colors` fading table at start-up.
    pub fade_report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { blobs: true, fade_report: false }
    }
}

impl PipelineConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if d.marker_diameter_min <= 0.0 || d.marker_diameter_max <= 0.0 {
            return Err(ConfigError::Invalid("marker diameters must be positive".into()));
        }
        if d.marker_diameter_min > d.marker_diameter_max {
            return Err(ConfigError::Invalid("marker_diameter_min exceeds marker_diameter_max".into()));
        }
        if d.y_axis_sign.abs() != 1.0 {
            return Err(ConfigError::Invalid("y_axis_sign must be 1 or -1".into()));
        }
        if d.gauss_smoothing != 0 && d.gauss_smoothing % 2 == 0 {
            return Err(ConfigError::Invalid("gauss_smoothing must be 0 or an odd aperture".into()));
        }
        if self.colors.markers.len() > MAX_MARKERS {
            return Err(ConfigError::Invalid(format!(
                "{} marker slots configured, at most {MAX_MARKERS} are supported",
                self.colors.markers.len()
            )));
        }
        if let Some(roi) = self.roi {
            if roi.width == 0 || roi.height == 0 || roi.width % ROI_ALIGNMENT != 0 || roi.height % ROI_ALIGNMENT != 0 {
                return Err(ConfigError::Invalid(format!(
                    "roi size {}x{} must be a non-zero multiple of {ROI_ALIGNMENT}",
                    roi.width, roi.height
                )));
            }
        }
        if !(self.motion.alpha > 0.0 && self.motion.alpha < 1.0) {
            return Err(ConfigError::Invalid("motion alpha must lie in (0, 1)".into()));
        }
        Ok(())
    }

    /// Origin of the processed region in full-frame coordinates.
    pub fn roi_origin(&self) -> (u32, u32) {
        self.roi.map_or((0, 0), |r| (r.x, r.y))
    }

    /// Use flags of the marker slots.
    pub fn used_markers(&self) -> [bool; MAX_MARKERS] {
        let mut used = [false; MAX_MARKERS];
        for (flag, slot) in used.iter_mut().zip(&self.colors.markers) {
            *flag = slot.used;
        }
        used
    }

    /// Name of a marker slot, empty for unconfigured slots.
    pub fn marker_name(&self, slot: usize) -> &str {
        self.colors.markers.get(slot).map_or("", |m| m.name.as_str())
    }

    /// Builds the color model from the configured databases.
    pub fn build_color_model(&self) -> Result<ColorModel, PipelineError> {
        let day = convert_entries(&self.colors.day)?;
        let night = convert_entries(&self.colors.night)?;
        Ok(ColorModel::new(day, night, self.colors.method, self.used_markers())?)
    }
}

fn convert_entries(entries: &[ColorEntryConfig]) -> Result<Vec<ColorModelEntry>, PipelineError> {
    entries
        .iter()
        .map(|e| {
            if e.markers.len() > MAX_MARKERS {
                return Err(ColorModelError::TooManyMarkers { found: e.markers.len(), max: MAX_MARKERS }.into());
            }
            let mut colors = ColorSet { background: e.background, ..ColorSet::default() };
            colors.markers[..e.markers.len()].copy_from_slice(&e.markers);
            let timestamp = e.timestamp.as_deref().map(parse_timestamp).transpose()?;
            Ok(ColorModelEntry { day: e.day, timestamp, colors })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        roi = [16, 8, 320, 240]

        [detection]
        creature_count = 4
        marker_diameter_min = 6
        marker_diameter_max = 20

        [motion]
        enabled = true
        policy = "max"

        [light]
        enabled = true
        position = [100, 60]
        color = { color = [60, 200, 200], tolerance = [10, 55, 55] }

        [colors]
        method = "interpolate"
        days_since_last_paint = 3
        markers = [{ name = "orange" }, { name = "blue", used = false }]

        [[colors.day]]
        day = 0
        timestamp = "2011-02-03_04-05-06"
        markers = [{ color = [10, 200, 200], tolerance = [5, 50, 50] }]
        background = { color = [20, 30, 200], tolerance = [10, 30, 55] }

        [[colors.night]]
        day = 0
        markers = [{ color = [12, 180, 150], tolerance = [5, 50, 50] }]
        background = { color = [20, 30, 100], tolerance = [10, 30, 55] }
    "#;

    #[test]
    fn parses_sample_document() {
        let config = match PipelineConfig::from_toml_str(SAMPLE) {
            Ok(c) => c,
            Err(e) => panic!("sample config rejected: {e}"),
        };
        assert_eq!(config.detection.creature_count, 4);
        assert_eq!(config.detection.erode_blob, 2);
        assert_eq!(config.roi_origin(), (16, 8));
        assert_eq!(config.motion.policy, DifferencePolicy::Max);
        assert_eq!(config.light.position, (100, 60));
        assert_eq!(config.light.vote_thresholds, [111.0, 100.0, 80.0]);
        assert_eq!(config.colors.method, SelectionMethod::Interpolate);
        assert_eq!(config.used_markers(), [true, false, false, false, false, false]);
        assert_eq!(config.marker_name(1), "blue");
        assert_eq!(config.marker_name(5), "");

        let model = config.build_color_model();
        assert!(model.is_ok());
    }

    #[test]
    fn marker_area_window_follows_diameters() {
        let detection = DetectionConfig { marker_diameter_min: 2.0, marker_diameter_max: 4.0, ..Default::default() };
        let (min, max) = detection.marker_area_range();
        approx::assert_relative_eq!(min, PI);
        approx::assert_relative_eq!(max, 4.0 * PI);
    }

    #[test]
    fn rejects_misaligned_roi() {
        let err = PipelineConfig::from_toml_str("roi = [0, 0, 100, 64]");
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_skew_sign_and_diameters() {
        assert!(PipelineConfig::from_toml_str("[detection]\ny_axis_sign = 0.5").is_err());
        assert!(PipelineConfig::from_toml_str("[detection]\nmarker_diameter_min = 0").is_err());
    }

    #[test]
    fn motion_alpha_excludes_both_ends() {
        assert!(PipelineConfig::from_toml_str("[motion]\nalpha = 0.0").is_err());
        assert!(PipelineConfig::from_toml_str("[motion]\nalpha = 1.0").is_err());
        assert!(PipelineConfig::from_toml_str("[motion]\nalpha = 0.5").is_ok());
    }

    #[test]
    fn even_smoothing_aperture_is_rejected() {
        assert!(PipelineConfig::from_toml_str("[detection]\ngauss_smoothing = 4").is_err());
        let config = PipelineConfig::from_toml_str("[detection]\ngauss_smoothing = 5");
        assert!(matches!(config, Ok(ref c) if c.detection.gauss_smoothing == 5));
    }

    #[test]
    fn empty_database_fails_model_construction() {
        let config = PipelineConfig::default();
        assert!(matches!(
            config.build_color_model(),
            Err(PipelineError::ColorModel(ColorModelError::EmptyDatabase { .. }))
        ));
    }
}
