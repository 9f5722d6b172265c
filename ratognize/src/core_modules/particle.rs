// THEORY:
// A `Particle` is the smallest unit of detection output: one connected foreground
// region reduced to an ellipse descriptor. It is a plain data container with no
// memory of previous frames. Particles are built fresh by every extraction pass,
// collected per frame, and dropped when the next frame starts. Identity across
// frames is left to downstream tracking tools.

use std::f64::consts::PI;

/// A detected blob, described as an ellipse fitted to its moments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    /// Center of mass in pixel coordinates (x, y).
    pub center: (f64, f64),
    /// Orientation of the major axis in radians. Within [-π/2, π/2] unless
    /// skew disambiguation rotated it by π.
    pub orientation: f64,
    /// Length of the major axis.
    pub axis_a: f64,
    /// Length of the minor axis.
    pub axis_b: f64,
    /// Radius of the circle with the same area.
    pub radius: f64,
    /// Area of the region (zeroth moment).
    pub area: f64,
    /// Index of the color class this particle was detected for. Whole-animal
    /// and motion particles use 0.
    pub class: usize,
}

impl Particle {
    /// Builds a circular particle, as stored in plain `BLOB` records.
    pub fn circle(center: (f64, f64), radius: f64, class: usize) -> Self {
        Self {
            center,
            orientation: 0.0,
            axis_a: radius,
            axis_b: radius,
            radius,
            area: PI * radius * radius,
            class,
        }
    }

    /// Ratio of the major to the minor axis.
    pub fn elongation(&self) -> f64 {
        self.axis_a / self.axis_b
    }

    /// Orientation converted to degrees, as written to output files.
    pub fn orientation_degrees(&self) -> f64 {
        self.orientation.to_degrees()
    }
}
