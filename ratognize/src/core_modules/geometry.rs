// THEORY:
// The `geometry` module turns the statistical moments of a pixel region into a
// `Particle`. It is the leaf of the detection stack and has no state.
//
// Key principles:
// 1.  **Contour Moments**: Moments are integrated over the traced outer boundary
//     polygon using Green's theorem rather than summed per pixel. A one-pixel
//     wide region therefore has zero area, exactly like the boundary-based
//     moments the calibration data was recorded with.
// 2.  **Inertia Ellipse**: The second central moments form a 2x2 inertia tensor.
//     Its eigenvalues give the elongation ratio, and the area fixes the scale of
//     the axes so that `π·A·B == area`.
// 3.  **Skew Disambiguation**: The ellipse orientation is only defined modulo π.
//     When requested, the third central moments decide which end is the head:
//     the thicker end produces a skew opposite to its direction, so a positive
//     projected skew rotates the orientation by π.
// 4.  **No Guards**: Degenerate regions (zero area, perfectly round shapes) give
//     NaN or unstable angles. They are passed through unchanged.

use std::f64::consts::PI;

use imageproc::point::Point;

use crate::core_modules::particle::Particle;

const FLT_EPSILON: f64 = f32::EPSILON as f64; // below this |m00| the polygon is treated as empty

/// Spatial and central moments of a region up to third order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
    pub m30: f64,
    pub m21: f64,
    pub m12: f64,
    pub m03: f64,
    pub mu20: f64,
    pub mu11: f64,
    pub mu02: f64,
    pub mu30: f64,
    pub mu21: f64,
    pub mu12: f64,
    pub mu03: f64,
}

impl Moments {
    /// Integrates the moments of a closed polygon given by its vertices.
    pub fn from_polygon(points: &[Point<i32>]) -> Self {
        let mut moments = Self::default();
        let Some(last) = points.last() else {
            return moments;
        };

        let (mut a00, mut a10, mut a01, mut a20, mut a11) = (0.0, 0.0, 0.0, 0.0, 0.0);
        let (mut a02, mut a30, mut a21, mut a12, mut a03) = (0.0, 0.0, 0.0, 0.0, 0.0);

        let mut xi_1 = last.x as f64;
        let mut yi_1 = last.y as f64;
        let mut xi_12 = xi_1 * xi_1;
        let mut yi_12 = yi_1 * yi_1;

        for p in points {
            let xi = p.x as f64;
            let yi = p.y as f64;
            let xi2 = xi * xi;
            let yi2 = yi * yi;
            let dxy = xi_1 * yi - xi * yi_1;
            let xii_1 = xi_1 + xi;
            let yii_1 = yi_1 + yi;

            a00 += dxy;
            a10 += dxy * xii_1;
            a01 += dxy * yii_1;
            a20 += dxy * (xi_1 * xii_1 + xi2);
            a11 += dxy * (xi_1 * (yii_1 + yi_1) + xi * (yii_1 + yi));
            a02 += dxy * (yi_1 * yii_1 + yi2);
            a30 += dxy * xii_1 * (xi_12 + xi2);
            a03 += dxy * yii_1 * (yi_12 + yi2);
            a21 += dxy
                * (xi_12 * (3.0 * yi_1 + yi) + 2.0 * xi * xi_1 * yii_1 + xi2 * (yi_1 + 3.0 * yi));
            a12 += dxy
                * (yi_12 * (3.0 * xi_1 + xi) + 2.0 * yi * yi_1 * xii_1 + yi2 * (xi_1 + 3.0 * xi));

            xi_1 = xi;
            yi_1 = yi;
            xi_12 = xi2;
            yi_12 = yi2;
        }

        if a00.abs() > FLT_EPSILON {
            // Orientation of the traversal decides the sign.
            let sign = if a00 > 0.0 { 1.0 } else { -1.0 };
            moments.m00 = a00 * sign / 2.0;
            moments.m10 = a10 * sign / 6.0;
            moments.m01 = a01 * sign / 6.0;
            moments.m20 = a20 * sign / 12.0;
            moments.m11 = a11 * sign / 24.0;
            moments.m02 = a02 * sign / 12.0;
            moments.m30 = a30 * sign / 20.0;
            moments.m21 = a21 * sign / 60.0;
            moments.m12 = a12 * sign / 60.0;
            moments.m03 = a03 * sign / 20.0;
        }

        moments.complete_central();
        moments
    }

    /// Derives the central moments from the spatial ones.
    fn complete_central(&mut self) {
        let (cx, cy) = if self.m00 != 0.0 {
            (self.m10 / self.m00, self.m01 / self.m00)
        } else {
            (0.0, 0.0)
        };

        self.mu20 = self.m20 - self.m10 * cx;
        self.mu11 = self.m11 - self.m10 * cy;
        self.mu02 = self.m02 - self.m01 * cy;
        self.mu30 = self.m30 - cx * (3.0 * self.mu20 + cx * self.m10);
        self.mu21 = self.m21 - cx * (2.0 * self.mu11 + cx * self.m01) - cy * self.mu20;
        self.mu12 = self.m12 - cy * (2.0 * self.mu11 + cy * self.m10) - cx * self.mu02;
        self.mu03 = self.m03 - cy * (3.0 * self.mu02 + cy * self.m01);
    }
}

/// Options for turning moments into a particle.
#[derive(Debug, Clone, Copy)]
pub struct GeometryOptions {
    /// Resolve the head/tail ambiguity of the orientation from third moments.
    pub skew_disambiguation: bool,
    /// Sign of the vertical image axis used when projecting the skew.
    pub y_axis_sign: f64,
}

impl Default for GeometryOptions {
    fn default() -> Self {
        Self { skew_disambiguation: false, y_axis_sign: 1.0 }
    }
}

/// Fits an ellipse to a region's moments.
pub fn particle_from_moments(m: &Moments, options: GeometryOptions, class: usize) -> Particle {
    let area = m.m00;
    let radius = (area / PI).sqrt();
    let center = (m.m10 / m.m00, m.m01 / m.m00);
    let mut orientation = (2.0 * m.mu11).atan2(m.mu20 - m.mu02) / 2.0;

    // --- Inertia ellipse ---
    let d1 = (m.mu20 + m.mu02) / 2.0;
    let d2 = (4.0 * m.mu11 * m.mu11 + (m.mu20 - m.mu02).powi(2)).sqrt() / 2.0;
    let ratio = ((d1 - d2) / (d1 + d2)).sqrt();
    let axis_a = (area / (PI * ratio)).sqrt();
    let axis_b = axis_a * ratio;

    // --- Head/tail disambiguation ---
    if options.skew_disambiguation {
        let skew_x = m.mu30 / m.mu20.powf(1.5);
        let skew_y = m.mu03 / m.mu02.powf(1.5);
        let skew_a = skew_x * orientation.cos() + skew_y * (options.y_axis_sign * orientation).sin();
        if skew_a > 0.0 {
            orientation += PI;
        }
    }

    Particle { center, orientation, axis_a, axis_b, radius, area, class }
}
