// THEORY:
// The `error` module collects every way a run of the engine can fail. Failures
// are terminal for the run: the orchestrator aborts the current frame and the
// caller decides whether to stop. Per-frame detection anomalies (blobs that are
// too big or too small) are NOT errors; they are diagnostic counters written to
// the log. Numeric degeneracies in the geometry stage are not detected either.
//
// Each failure domain owns its own enum so callers can match on the precise
// cause, and `PipelineError` gathers them for the top-level API.

use std::io;
use std::path::PathBuf;

use crate::core_modules::light_classifier::LightState;

/// Failures while resolving a color set from the historical color database.
#[derive(Debug, thiserror::Error)]
pub enum ColorModelError {
    #[error("no color model is defined for the uninitialized light state")]
    UninitializedLight,
    #[error("days since last paint ({day}) is after the last database entry (day {last})")]
    DayTooLarge { day: i32, last: i32 },
    #[error("days since last paint ({day}) is before the first database entry (day {first})")]
    DayTooSmall { day: i32, first: i32 },
    #[error("video start time {start} is after the last dated database entry")]
    DateTooLate { start: chrono::NaiveDateTime },
    #[error("video start time {start} is before the first dated database entry")]
    DateTooEarly { start: chrono::NaiveDateTime },
    #[error("date interpolation needs the video start time")]
    MissingVideoStart,
    #[error("{light} database entry for day {day} has no timestamp")]
    MissingTimestamp { light: LightState, day: i32 },
    #[error("line fit needs at least 2 database entries, found {found}")]
    TooFewEntries { found: usize },
    #[error("the {light} color database is empty")]
    EmptyDatabase { light: LightState },
    #[error("database entry has {found} marker colors, at most {max} are supported")]
    TooManyMarkers { found: usize, max: usize },
}

/// Failures while loading or validating the pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Date(#[from] DateError),
}

/// Failures while reading previously written blob, barcode or log files.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("frame number mismatch in {kind} input: expected {expected}, found {found}")]
    FrameMismatch { kind: &'static str, expected: u64, found: u64 },
    #[error("malformed {kind} line for frame {frame}: {line}")]
    Malformed { kind: &'static str, frame: u64, line: String },
    #[error("unknown light state name: {0}")]
    UnknownLight(String),
    #[error("{kind} input ended before frame {frame}")]
    Exhausted { kind: &'static str, frame: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures while parsing timestamps or paint-date records.
#[derive(Debug, thiserror::Error)]
pub enum DateError {
    #[error("could not parse a timestamp from '{0}'")]
    Unparsable(String),
    #[error("no paint date precedes the video start {start}")]
    NoPaintBefore { start: chrono::NaiveDateTime },
    #[error("malformed paint date line: {0}")]
    MalformedPaintLine(String),
}

/// Top-level error returned by the frame orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    ColorModel(#[from] ColorModelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("could not write output: {0}")]
    Io(#[from] io::Error),
    #[error("frame {frame} has size {found:?}, expected {expected:?}")]
    FrameSize { frame: u64, expected: (u32, u32), found: (u32, u32) },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
