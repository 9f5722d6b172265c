// THEORY:
// The `pipeline` module is the top-level API of the engine. A `FrameOrchestrator`
// owns every piece of state that survives from one frame to the next and runs
// the stages of a frame strictly in order:
//
// 1.  **Light**: on scheduled frames, classify the ambient light. When the state
//     changes, resolve the marker colors for the new state from the color model.
// 2.  **Creatures**: everything that does not look like the cage background,
//     cleaned up by erosion then dilation, is a whole-animal blob.
// 3.  **Markers**: the HSV frame is blanked outside the whole-animal mask and
//     searched once per used marker color.
// 4.  **Motion**: optionally, pixels that differ from the running background
//     average form motion blobs.
//
// Any failure aborts the frame and is returned to the caller; nothing of a
// failed frame is reported. Size outliers of every extraction pass are not
// failures, they go to the diagnostic log.

use std::io::Write;
use std::time::Instant;

use image::{GrayImage, Luma, Rgb, RgbImage, imageops};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate_mut, erode_mut};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::core_modules::blob_extractor::{ExtractionParams, extract_blobs};
use crate::core_modules::color_filter::filter_hsv_into;
use crate::core_modules::color_model::{ColorModel, ColorQuery, ColorSet, MAX_MARKERS};
use crate::core_modules::geometry::GeometryOptions;
use crate::core_modules::hsv::HsvImage;
use crate::core_modules::light_classifier::{LightClassifier, LightState};
use crate::core_modules::motion_filter::MotionFilter;
use crate::core_modules::particle::Particle;
use crate::core_modules::scratch::ScratchImage;
use crate::error::{PipelineError, Result};
use crate::output::diagnostics::{DiagnosticLog, marker_class_label};
use crate::replay::ReplayBlobs;

const BODY_CLASS_LABEL: &str = "MD"; // whole-animal and motion outliers share this label
const BODY_BUDGET_PER_CREATURE: usize = 2;
const MARKER_BUDGET_PER_CREATURE: usize = 20;

/// Everything the pipeline found in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// Light state in effect after this frame's light check.
    pub light: LightState,
    /// True if the light state (and so the color set) changed on this frame.
    pub light_changed: bool,
    /// Accepted marker blobs, grouped by slot in slot order.
    pub markers: Vec<Particle>,
    /// Whole-animal blobs.
    pub creatures: Vec<Particle>,
    /// Motion blobs; `None` when motion detection is disabled.
    pub motion: Option<Vec<Particle>>,
    /// Colors the marker passes used.
    pub colors: ColorSet,
}

/// Per-session state and the per-frame stage sequence.
pub struct FrameOrchestrator<L: Write> {
    config: PipelineConfig,
    model: ColorModel,
    query: ColorQuery,
    classifier: LightClassifier,
    motion: MotionFilter,
    /// Last known light state, used for change detection.
    light: LightState,
    colors: ColorSet,
    log: DiagnosticLog<L>,
    creature_mask: ScratchImage<Luma<u8>>,
    masked_hsv: ScratchImage<Rgb<u8>>,
    marker_mask: ScratchImage<Luma<u8>>,
}

impl<L: Write> FrameOrchestrator<L> {
    /// Builds the orchestrator and its color model. With light detection
    /// disabled the night colors are selected once, here.
    pub fn new(config: PipelineConfig, query: ColorQuery, log: DiagnosticLog<L>) -> Result<Self> {
        let model = config.build_color_model()?;
        let classifier = LightClassifier::new(config.light.clone(), config.roi_origin());
        let motion = MotionFilter::new(&config.motion);

        let mut orchestrator = Self {
            config,
            model,
            query,
            classifier,
            motion,
            light: LightState::Uninitialized,
            colors: ColorSet::default(),
            log,
            creature_mask: ScratchImage::default(),
            masked_hsv: ScratchImage::default(),
            marker_mask: ScratchImage::default(),
        };

        if !orchestrator.config.light.enabled {
            orchestrator.colors = orchestrator.select_colors(0, LightState::Night)?;
            orchestrator.light = LightState::Night;
        }
        Ok(orchestrator)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn color_model(&self) -> &ColorModel {
        &self.model
    }

    pub fn light(&self) -> LightState {
        self.light
    }

    /// The color set currently used by the marker passes.
    pub fn colors(&self) -> &ColorSet {
        &self.colors
    }

    pub fn log_mut(&mut self) -> &mut DiagnosticLog<L> {
        &mut self.log
    }

    pub fn into_log(self) -> DiagnosticLog<L> {
        self.log
    }

    /// Runs every stage on one frame. `frame` and `hsv` are the same image in
    /// RGB and in 8-bit HSV, both already cropped to the region of interest.
    pub fn process_frame(&mut self, frame_no: u64, frame: &RgbImage, hsv: &HsvImage) -> Result<FrameReport> {
        if frame.dimensions() != hsv.dimensions() {
            return Err(PipelineError::FrameSize {
                frame: frame_no,
                expected: frame.dimensions(),
                found: hsv.dimensions(),
            });
        }
        let (width, height) = hsv.dimensions();

        // --- 1. Light state and color selection ---
        let mut light_changed = false;
        if self.classifier.is_due(frame_no) {
            let reading = self.classifier.read(frame, hsv);
            let state = self.classifier.classify(&reading);
            light_changed = self.change_light(frame_no, state)?;
            self.log.light_reading(frame_no, &reading)?;
        }

        // --- 2. Whole-animal blobs: anything that is not background ---
        let started = Instant::now();
        let detection = &self.config.detection;
        let creature_mask = self.creature_mask.get(width, height);
        filter_hsv_into(hsv, &self.colors.background, creature_mask);
        imageops::invert(creature_mask);
        erode_mut(creature_mask, Norm::LInf, detection.erode_creature);
        dilate_mut(creature_mask, Norm::LInf, detection.dilate_creature);

        let geometry = GeometryOptions {
            skew_disambiguation: detection.ellipse_blobs,
            y_axis_sign: detection.y_axis_sign,
        };
        let mut creatures = Vec::new();
        let body_params = ExtractionParams {
            area_min: self.config.motion.area_min,
            area_max: self.config.motion.area_max,
            elongation_max: None,
            budget: detection.creature_count * BODY_BUDGET_PER_CREATURE,
            class: 0,
            geometry,
        };
        let pass = extract_blobs(creature_mask, &body_params, &mut creatures);
        self.log.outliers(frame_no, BODY_CLASS_LABEL, &pass.outliers)?;
        debug!(frame = frame_no, count = creatures.len(), elapsed_us = started.elapsed().as_micros() as u64, "creature pass");

        // --- 3. Marker blobs inside the whole-animal mask ---
        let started = Instant::now();
        let masked_hsv = self.masked_hsv.get(width, height);
        for ((dst, src), keep) in masked_hsv.pixels_mut().zip(hsv.pixels()).zip(creature_mask.pixels()) {
            *dst = if keep.0[0] != 0 { *src } else { Rgb([0, 0, 0]) };
        }

        let (area_min, area_max) = detection.marker_area_range();
        let used = *self.model.used_markers();
        let marker_mask = self.marker_mask.get(width, height);
        let mut markers = Vec::new();
        for slot in (0..MAX_MARKERS).filter(|&slot| used[slot]) {
            filter_hsv_into(masked_hsv, &self.colors.markers[slot], marker_mask);
            dilate_mut(marker_mask, Norm::LInf, detection.dilate_blob);
            erode_mut(marker_mask, Norm::LInf, detection.erode_blob);

            let params = ExtractionParams {
                area_min,
                area_max,
                elongation_max: Some(detection.elongation_max),
                budget: detection.creature_count * MARKER_BUDGET_PER_CREATURE,
                class: slot,
                geometry,
            };
            let pass = extract_blobs(marker_mask, &params, &mut markers);
            let label = marker_class_label(slot, self.config.marker_name(slot));
            self.log.outliers(frame_no, &label, &pass.outliers)?;
        }
        debug!(frame = frame_no, count = markers.len(), elapsed_us = started.elapsed().as_micros() as u64, "marker passes");

        // --- 4. Motion blobs ---
        let motion = if self.config.motion.enabled {
            let started = Instant::now();
            let mask: GrayImage = self.motion.apply(frame);
            let mut particles = Vec::new();
            let pass = extract_blobs(&mask, &body_params, &mut particles);
            self.log.outliers(frame_no, BODY_CLASS_LABEL, &pass.outliers)?;
            debug!(frame = frame_no, count = particles.len(), elapsed_us = started.elapsed().as_micros() as u64, "motion pass");
            Some(particles)
        } else {
            None
        };

        Ok(FrameReport {
            frame: frame_no,
            light: self.light,
            light_changed,
            markers,
            creatures,
            motion,
            colors: self.colors,
        })
    }

    /// Replays a frame from earlier output: applies a logged light change, if
    /// any, and reports the stored particles.
    pub fn replay_frame(&mut self, frame_no: u64, light: Option<LightState>, blobs: ReplayBlobs) -> Result<FrameReport> {
        let light_changed = match light {
            Some(state) => self.change_light(frame_no, state)?,
            None => false,
        };
        Ok(FrameReport {
            frame: frame_no,
            light: self.light,
            light_changed,
            markers: blobs.markers,
            creatures: blobs.creatures,
            motion: self.config.motion.enabled.then_some(blobs.motion),
            colors: self.colors,
        })
    }

    fn change_light(&mut self, frame_no: u64, state: LightState) -> Result<bool> {
        if state == self.light {
            return Ok(false);
        }
        self.colors = self.select_colors(frame_no, state)?;
        self.log.light_change(frame_no, state)?;
        if state == LightState::Strange {
            warn!(frame = frame_no, from = %self.light, "indicator light is on in a dark frame");
        } else {
            info!(frame = frame_no, from = %self.light, to = %state, "light state changed");
        }
        self.light = state;
        Ok(true)
    }

    fn select_colors(&self, frame_no: u64, state: LightState) -> Result<ColorSet> {
        self.model.select(state, &self.query).map_err(|e| {
            error!(frame = frame_no, light = %state, error = %e, "could not select marker colors");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColorEntryConfig, MarkerSlot};
    use crate::core_modules::color_filter::{ColorSpec, Hsv};

    fn entry(day: i32) -> ColorEntryConfig {
        ColorEntryConfig {
            day,
            timestamp: None,
            markers: vec![ColorSpec::new(Hsv::new(60, 200, 200), Hsv::new(10, 55, 55))],
            background: ColorSpec::new(Hsv::new(0, 0, 0), Hsv::new(10, 40, 40)),
        }
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.colors.markers = vec![MarkerSlot { name: "green".into(), used: true }];
        config.colors.day = vec![entry(0)];
        config.colors.night = vec![entry(0)];
        config
    }

    #[test]
    fn disabled_light_selects_night_colors_up_front() {
        let orchestrator = match FrameOrchestrator::new(config(), ColorQuery::default(), DiagnosticLog::new(Vec::new())) {
            Ok(o) => o,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(orchestrator.light(), LightState::Night);
        assert_eq!(orchestrator.colors().markers[0].color.h, 60);
        assert!(orchestrator.into_log().into_inner().is_empty());
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let mut orchestrator = match FrameOrchestrator::new(config(), ColorQuery::default(), DiagnosticLog::new(Vec::new())) {
            Ok(o) => o,
            Err(e) => panic!("{e}"),
        };
        let result = orchestrator.process_frame(0, &RgbImage::new(8, 8), &HsvImage::new(16, 8));
        assert!(matches!(result, Err(PipelineError::FrameSize { frame: 0, .. })));
    }

    #[test]
    fn replayed_light_change_is_logged_once() {
        let mut cfg = config();
        cfg.light.enabled = true;
        let mut orchestrator = match FrameOrchestrator::new(cfg, ColorQuery::default(), DiagnosticLog::new(Vec::new())) {
            Ok(o) => o,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(orchestrator.light(), LightState::Uninitialized);

        let first = orchestrator.replay_frame(3, Some(LightState::Day), ReplayBlobs::default());
        assert!(matches!(first, Ok(ref r) if r.light_changed && r.light == LightState::Day && r.motion.is_none()));
        let again = orchestrator.replay_frame(4, Some(LightState::Day), ReplayBlobs::default());
        assert!(matches!(again, Ok(ref r) if !r.light_changed));

        let log = String::from_utf8_lossy(&orchestrator.into_log().into_inner()).into_owned();
        assert_eq!(log, "3\tLED\tDAYLIGHT\n");
    }

    #[test]
    fn empty_day_database_fails_construction() {
        let mut cfg = config();
        cfg.light.enabled = true;
        cfg.colors.day.clear();
        // An empty day database is rejected before any frame is seen.
        assert!(FrameOrchestrator::new(cfg, ColorQuery::default(), DiagnosticLog::new(Vec::new())).is_err());
    }
}
