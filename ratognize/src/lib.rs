// THEORY:
// This file is the entry point of the `ratognize` library crate, the per-frame
// vision engine that finds color-marked animals in cage recordings.
//
// The public face is `pipeline::FrameOrchestrator`: it is built from a
// `config::PipelineConfig` and fed one frame at a time, and returns a
// `pipeline::FrameReport` with the marker, whole-animal and motion blobs of that
// frame. The detection stages themselves live in `core_modules` and are usable
// on their own. `output` writes the product files (diagnostic log, `.blobs`,
// fading-color report) and `replay` reads them back.

pub mod config;
pub mod core_modules;
pub mod datetime;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod replay;

pub use config::PipelineConfig;
pub use core_modules::color_model::{ColorQuery, ColorSet};
pub use core_modules::light_classifier::LightState;
pub use core_modules::particle::Particle;
pub use error::{PipelineError, Result};
pub use pipeline::{FrameOrchestrator, FrameReport};
