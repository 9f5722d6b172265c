// THEORY:
// Replay mode feeds the pipeline with results of an earlier run instead of
// detecting blobs again. Three line-oriented text inputs are consumed in lock
// step with the frame counter:
//
// 1.  **Barcodes** (`.blobs.barcodes`, written by the offline resolver):
//     `frame count {id cx cy xw yw deg mfix} ...`
// 2.  **Blobs** (`.blobs`, written by this engine): `MD`, `RAT`, `BLOB` and
//     `BLOBE` lines, see `output::blob_file`.
// 3.  **Light changes** (the diagnostic log): `frame LED STATE` lines.
//
// Every reader skips blank lines, `#` comments and lines of earlier frames. A
// line of a later frame is an error for the first two inputs; the light reader
// keeps it for the next call instead, because most frames have no LED line.
// Coordinates in the files are full-frame pixels and are shifted back into the
// processed region on the way in.

use std::fmt;
use std::io::{BufRead, Lines};

use crate::core_modules::particle::Particle;
use crate::core_modules::light_classifier::LightState;
use crate::error::ReplayError;

const BARCODE_FIELDS: usize = 7;
const CIRCLE_FIELDS: usize = 4;
const ELLIPSE_FIELDS: usize = 6;
const BODY_FIELDS: usize = 5;
const MINOR_AXIS_SCALE: f64 = 0.7; // marker width relative to the mean dot diameter

/// Fix-up flags the offline resolver attaches to each barcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MarkerFix(u32);

impl MarkerFix {
    pub const FULL_FOUND: Self = Self(1);
    pub const SHARES_ID: Self = Self(2);
    pub const SHARES_BLOB: Self = Self(4);
    pub const PARTLY_FOUND_FROM_TDIST: Self = Self(8);
    pub const DELETED: Self = Self(16);
    pub const CHOSEN: Self = Self(32);
    pub const FULL_NO_CLUSTER: Self = Self(64);
    pub const CHANGED_ID: Self = Self(128);
    pub const VIRTUAL: Self = Self(256);
    pub const DEBUG: Self = Self(512);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::FULL_FOUND, "FULLFOUND"),
        (Self::SHARES_ID, "SHARESID"),
        (Self::SHARES_BLOB, "SHARESBLOB"),
        (Self::PARTLY_FOUND_FROM_TDIST, "PARTLYFOUND_FROM_TDIST"),
        (Self::DELETED, "DELETED"),
        (Self::CHOSEN, "CHOSEN"),
        (Self::FULL_NO_CLUSTER, "FULLNOCLUSTER"),
        (Self::CHANGED_ID, "CHANGEDID"),
        (Self::VIRTUAL, "VIRTUAL"),
        (Self::DEBUG, "DEBUG"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Every barcode chip was found.
    pub fn is_full(self) -> bool {
        self.contains(Self::FULL_FOUND) || self.contains(Self::FULL_NO_CLUSTER)
    }

    /// Dropped by the resolver, or never assigned any flag.
    pub fn is_discarded(self) -> bool {
        self.is_empty() || self.contains(Self::DELETED)
    }

    /// A live barcode that competes with another one for an id or a blob.
    pub fn is_contested(self) -> bool {
        !self.contains(Self::DELETED) && (self.contains(Self::SHARES_ID) || self.contains(Self::SHARES_BLOB))
    }

    /// Chosen as the final trajectory point for its id.
    pub fn is_chosen(self) -> bool {
        self.contains(Self::CHOSEN)
    }

    /// Chosen, but interpolated rather than observed.
    pub fn is_virtual_choice(self) -> bool {
        self.contains(Self::CHOSEN) && self.contains(Self::VIRTUAL)
    }
}

impl std::ops::BitOr for MarkerFix {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MarkerFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, n)| *n).collect();
        write!(f, "MarkerFix({})", names.join(" | "))
    }
}

/// A barcode resolved by the offline tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Barcode {
    pub id: String,
    /// Ellipse approximation; `class` is unused and left at 0.
    pub shape: Particle,
    pub fix: MarkerFix,
}

/// Geometry needed to turn barcode records into ellipses.
#[derive(Debug, Clone, Copy)]
pub struct BarcodeShape {
    pub marker_diameter_min: f64,
    pub marker_diameter_max: f64,
    pub chips_per_marker: u32,
}

impl BarcodeShape {
    fn axes(&self) -> (f64, f64) {
        let minor = ((self.marker_diameter_min + self.marker_diameter_max) / 2.0).trunc() * MINOR_AXIS_SCALE;
        (f64::from(self.chips_per_marker) * minor, minor)
    }
}

/// Particles of one frame read back from a `.blobs` file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayBlobs {
    pub markers: Vec<Particle>,
    pub creatures: Vec<Particle>,
    pub motion: Vec<Particle>,
}

/// A tokenized data line: frame number plus remaining tokens.
struct DataLine {
    frame: u64,
    text: String,
}

impl DataLine {
    fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace().skip(1)
    }
}

fn parse_frame(kind: &'static str, line: String) -> Result<Option<DataLine>, ReplayError> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let head = trimmed.split_whitespace().next().unwrap_or_default();
    match head.parse::<u64>() {
        Ok(frame) => Ok(Some(DataLine { frame, text: line })),
        Err(_) => Err(ReplayError::Malformed { kind, frame: 0, line }),
    }
}

fn number(kind: &'static str, frame: u64, token: &str, line: &str) -> Result<f64, ReplayError> {
    token
        .trim_matches(|c| c == '{' || c == '}')
        .parse::<f64>()
        .map_err(|_| ReplayError::Malformed { kind, frame, line: line.to_string() })
}

/// Reads barcode lines frame by frame.
pub struct BarcodeReader<R: BufRead> {
    lines: Lines<R>,
    shape: BarcodeShape,
    offset: (f64, f64),
}

impl<R: BufRead> BarcodeReader<R> {
    const KIND: &'static str = "barcode";

    pub fn new(input: R, shape: BarcodeShape, roi_origin: (u32, u32)) -> Self {
        Self { lines: input.lines(), shape, offset: (f64::from(roi_origin.0), f64::from(roi_origin.1)) }
    }

    /// Barcodes of `frame`.
    pub fn next_frame(&mut self, frame: u64) -> Result<Vec<Barcode>, ReplayError> {
        while let Some(line) = self.lines.next() {
            let Some(data) = parse_frame(Self::KIND, line?)? else {
                continue;
            };
            if data.frame < frame {
                continue;
            }
            if data.frame > frame {
                return Err(ReplayError::FrameMismatch { kind: Self::KIND, expected: frame, found: data.frame });
            }
            return self.parse_line(&data);
        }
        Err(ReplayError::Exhausted { kind: Self::KIND, frame })
    }

    fn parse_line(&self, data: &DataLine) -> Result<Vec<Barcode>, ReplayError> {
        let malformed = || ReplayError::Malformed { kind: Self::KIND, frame: data.frame, line: data.text.clone() };
        let mut tokens = data.tokens();
        let count: i64 = tokens.next().and_then(|t| t.parse().ok()).ok_or_else(malformed)?;
        if count < 0 {
            return Err(malformed());
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let fields: Vec<&str> = tokens.collect();
        if fields.len() % BARCODE_FIELDS != 0 {
            return Err(malformed());
        }
        let (axis_a, axis_b) = self.shape.axes();
        fields
            .chunks(BARCODE_FIELDS)
            .map(|chunk| {
                let num = |i: usize| number(Self::KIND, data.frame, chunk[i], &data.text);
                let fix = chunk[6].trim_matches(|c| c == '{' || c == '}').parse::<u32>().map_err(|_| malformed())?;
                Ok(Barcode {
                    id: chunk[0].trim_matches(|c| c == '{' || c == '}').to_string(),
                    shape: Particle {
                        center: (num(1)? - self.offset.0, num(2)? - self.offset.1),
                        orientation: num(5)?.to_radians(),
                        axis_a,
                        axis_b,
                        radius: (axis_a * axis_b).sqrt(),
                        area: std::f64::consts::PI * axis_a * axis_b,
                        class: 0,
                    },
                    fix: MarkerFix::from_bits(fix),
                })
            })
            .collect()
    }
}

/// Reads `.blobs` lines frame by frame.
pub struct BlobReader<R: BufRead> {
    lines: Lines<R>,
    offset: (f64, f64),
    motion_enabled: bool,
}

impl<R: BufRead> BlobReader<R> {
    const KIND: &'static str = "blob";

    pub fn new(input: R, roi_origin: (u32, u32), motion_enabled: bool) -> Self {
        Self { lines: input.lines(), offset: (f64::from(roi_origin.0), f64::from(roi_origin.1)), motion_enabled }
    }

    /// Reads lines until the marker, creature and (if enabled) motion records
    /// of `frame` have all been seen.
    pub fn next_frame(&mut self, frame: u64) -> Result<ReplayBlobs, ReplayError> {
        let mut blobs = ReplayBlobs::default();
        let (mut markers_seen, mut creatures_seen, mut motion_seen) = (false, false, !self.motion_enabled);

        while let Some(line) = self.lines.next() {
            let Some(data) = parse_frame(Self::KIND, line?)? else {
                continue;
            };
            if data.frame < frame {
                continue;
            }
            if data.frame > frame {
                return Err(ReplayError::FrameMismatch { kind: Self::KIND, expected: frame, found: data.frame });
            }

            let mut tokens = data.tokens();
            let kind = tokens.next().unwrap_or_default();
            let _count = tokens.next();
            let fields: Vec<&str> = tokens.collect();
            match kind {
                "BLOB" | "BLOBE" => {
                    self.parse_markers(&data, &fields, &mut blobs.markers)?;
                    markers_seen = true;
                }
                "RAT" => {
                    self.parse_bodies(&data, &fields, &mut blobs.creatures)?;
                    creatures_seen = true;
                }
                "MD" => {
                    self.parse_bodies(&data, &fields, &mut blobs.motion)?;
                    motion_seen = true;
                }
                _ => return Err(ReplayError::Malformed { kind: Self::KIND, frame, line: data.text }),
            }

            if markers_seen && creatures_seen && motion_seen {
                return Ok(blobs);
            }
        }
        Err(ReplayError::Exhausted { kind: Self::KIND, frame })
    }

    fn parse_markers(&self, data: &DataLine, fields: &[&str], out: &mut Vec<Particle>) -> Result<(), ReplayError> {
        let malformed = || ReplayError::Malformed { kind: Self::KIND, frame: data.frame, line: data.text.clone() };
        let num = |t: &str| number(Self::KIND, data.frame, t, &data.text);
        let mut rest = fields;
        while !rest.is_empty() {
            // A closing brace on the fourth field marks the circle layout.
            let width = match rest.get(3) {
                Some(t) if t.ends_with('}') => CIRCLE_FIELDS,
                Some(_) => ELLIPSE_FIELDS,
                None => return Err(malformed()),
            };
            if rest.len() < width {
                return Err(malformed());
            }
            let (record, tail) = rest.split_at(width);
            let class = num(record[0])? as usize;
            let center = (num(record[1])? - self.offset.0, num(record[2])? - self.offset.1);
            let particle = if width == CIRCLE_FIELDS {
                Particle::circle(center, num(record[3])?, class)
            } else {
                let (axis_a, axis_b) = (num(record[3])?, num(record[4])?);
                Particle {
                    center,
                    orientation: num(record[5])?.to_radians(),
                    axis_a,
                    axis_b,
                    radius: (axis_a * axis_b).sqrt(),
                    area: std::f64::consts::PI * axis_a * axis_b,
                    class,
                }
            };
            out.push(particle);
            rest = tail;
        }
        Ok(())
    }

    fn parse_bodies(&self, data: &DataLine, fields: &[&str], out: &mut Vec<Particle>) -> Result<(), ReplayError> {
        if fields.len() % BODY_FIELDS != 0 {
            return Err(ReplayError::Malformed { kind: Self::KIND, frame: data.frame, line: data.text.clone() });
        }
        let num = |t: &str| number(Self::KIND, data.frame, t, &data.text);
        for record in fields.chunks(BODY_FIELDS) {
            let (axis_a, axis_b) = (num(record[2])?, num(record[3])?);
            out.push(Particle {
                center: (num(record[0])? - self.offset.0, num(record[1])? - self.offset.1),
                orientation: num(record[4])?.to_radians(),
                axis_a,
                axis_b,
                radius: (axis_a * axis_b).sqrt(),
                area: std::f64::consts::PI * axis_a * axis_b,
                class: 0,
            });
        }
        Ok(())
    }
}

/// Reads light-change lines from a diagnostic log.
pub struct LightLogReader<R: BufRead> {
    lines: Lines<R>,
    pending: Option<DataLine>,
}

impl<R: BufRead> LightLogReader<R> {
    const KIND: &'static str = "log";

    pub fn new(input: R) -> Self {
        Self { lines: input.lines(), pending: None }
    }

    /// The light state logged for `frame`, if its light changed there.
    pub fn next_frame(&mut self, frame: u64) -> Result<Option<LightState>, ReplayError> {
        loop {
            let data = match self.pending.take() {
                Some(data) => data,
                None => match self.lines.next() {
                    Some(line) => match parse_frame(Self::KIND, line?)? {
                        Some(data) => data,
                        None => continue,
                    },
                    None => return Ok(None),
                },
            };
            if data.frame < frame {
                continue;
            }
            if data.frame > frame {
                self.pending = Some(data);
                return Ok(None);
            }

            let mut tokens = data.tokens();
            if tokens.next() != Some("LED") {
                continue;
            }
            let name = tokens.next().unwrap_or_default();
            return name.parse::<LightState>().map(Some);
        }
    }
}
