// THEORY:
// The `color_filter` module thresholds an HSV frame against a color and a
// symmetric per-channel tolerance, producing a binary mask (0 or 255).
//
// Key principles:
// 1.  **Circular Hue**: Hue lives on a circle of 180 steps. The window around the
//     target is computed modulo 180; when it crosses the 0/179 boundary it is
//     split into two ranges and their union is used.
// 2.  **Clamped Linear Channels**: Saturation and value windows are plain
//     intervals clamped to [0, 255].
// 3.  **Hue Tolerance Ceiling**: The hue tolerance is clamped to 89 so the window
//     never covers the whole circle and the target hue is always inside it.
// 4.  **Infallible**: Filtering never fails. An empty mask simply yields zero
//     blobs in the next stage.

use image::GrayImage;
use serde::Deserialize;

use crate::core_modules::hsv::HsvImage;

const HUE_CIRCLE: i32 = 180;
const MAX_HUE_TOLERANCE: i32 = 89;
const MASK_ON: u8 = 255;

/// A point in 8-bit HSV space. Deserializes from `[h, s, v]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "[i32; 3]")]
pub struct Hsv {
    pub h: i32,
    pub s: i32,
    pub v: i32,
}

impl Hsv {
    pub const fn new(h: i32, s: i32, v: i32) -> Self {
        Self { h, s, v }
    }

    /// Channel by index: 0 = hue, 1 = saturation, 2 = value.
    pub fn channel(&self, index: usize) -> i32 {
        match index {
            0 => self.h,
            1 => self.s,
            _ => self.v,
        }
    }

    pub fn set_channel(&mut self, index: usize, value: i32) {
        match index {
            0 => self.h = value,
            1 => self.s = value,
            _ => self.v = value,
        }
    }
}

impl From<[i32; 3]> for Hsv {
    fn from([h, s, v]: [i32; 3]) -> Self {
        Self { h, s, v }
    }
}

/// A color with its detection tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ColorSpec {
    pub color: Hsv,
    pub tolerance: Hsv,
}

impl ColorSpec {
    pub const fn new(color: Hsv, tolerance: Hsv) -> Self {
        Self { color, tolerance }
    }
}

/// The acceptance window derived from a `ColorSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvWindow {
    pub hue_min: i32,
    pub hue_max: i32,
    pub saturation: (i32, i32),
    pub value: (i32, i32),
}

impl HsvWindow {
    pub fn new(spec: &ColorSpec) -> Self {
        let tolerance = spec.tolerance.h.clamp(0, MAX_HUE_TOLERANCE);
        let hue_max = (spec.color.h + tolerance) % HUE_CIRCLE;
        let hue_min = (spec.color.h + HUE_CIRCLE - tolerance) % HUE_CIRCLE;
        let clamp = |c: i32, t: i32| ((c - t).max(0), (c + t).min(255));
        Self {
            hue_min,
            hue_max,
            saturation: clamp(spec.color.s, spec.tolerance.s),
            value: clamp(spec.color.v, spec.tolerance.v),
        }
    }

    /// True when the window crosses the 0/179 hue boundary.
    pub fn wraps(&self) -> bool {
        self.hue_max < self.hue_min
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        let [h, s, v] = hsv.map(i32::from);
        let hue_ok = if self.wraps() {
            // Union of [hue_min, 255] and [0, hue_max].
            h >= self.hue_min || h <= self.hue_max
        } else {
            h >= self.hue_min && h <= self.hue_max
        };
        hue_ok
            && (self.saturation.0..=self.saturation.1).contains(&s)
            && (self.value.0..=self.value.1).contains(&v)
    }
}

/// Thresholds an HSV image into a newly allocated mask.
pub fn filter_hsv(hsv: &HsvImage, spec: &ColorSpec) -> GrayImage {
    let mut mask = GrayImage::new(hsv.width(), hsv.height());
    filter_hsv_into(hsv, spec, &mut mask);
    mask
}

/// Thresholds an HSV image into an existing mask of the same size.
pub fn filter_hsv_into(hsv: &HsvImage, spec: &ColorSpec, mask: &mut GrayImage) {
    debug_assert_eq!(hsv.dimensions(), mask.dimensions());
    let window = HsvWindow::new(spec);
    for (src, dst) in hsv.pixels().zip(mask.pixels_mut()) {
        dst.0[0] = if window.contains(src.0) { MASK_ON } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn spec(h: i32, tol_h: i32) -> ColorSpec {
        ColorSpec::new(Hsv::new(h, 128, 128), Hsv::new(tol_h, 40, 40))
    }

    #[test]
    fn target_hue_always_matches() {
        for h in [0, 2, 45, 90, 150, 179] {
            for tol in [0, 1, 10, 60, 89, 120] {
                let window = HsvWindow::new(&spec(h, tol));
                assert!(window.contains([h as u8, 128, 128]), "h={h} tol={tol}");
            }
        }
    }

    #[test]
    fn window_wraps_across_zero() {
        let window = HsvWindow::new(&spec(2, 10));
        assert!(window.wraps());
        assert_eq!((window.hue_min, window.hue_max), (172, 12));
        assert!(window.contains([178, 128, 128]));
        assert!(window.contains([12, 128, 128]));
        assert!(!window.contains([13, 128, 128]));
        assert!(!window.contains([171, 128, 128]));
    }

    #[test]
    fn plain_window_is_inclusive() {
        let window = HsvWindow::new(&spec(90, 5));
        assert!(!window.wraps());
        assert!(window.contains([85, 128, 128]));
        assert!(window.contains([95, 128, 128]));
        assert!(!window.contains([96, 128, 128]));
    }

    #[test]
    fn saturation_and_value_clamp() {
        let spec = ColorSpec::new(Hsv::new(30, 10, 250), Hsv::new(5, 20, 20));
        let window = HsvWindow::new(&spec);
        assert_eq!(window.saturation, (0, 30));
        assert_eq!(window.value, (230, 255));
        assert!(window.contains([30, 0, 255]));
        assert!(!window.contains([30, 31, 255]));
    }

    #[test]
    fn mask_marks_matching_pixels() {
        let mut hsv = HsvImage::from_pixel(3, 2, Rgb([0, 0, 0]));
        hsv.put_pixel(1, 1, Rgb([178, 128, 128]));
        let mask = filter_hsv(&hsv, &spec(2, 10));
        assert_eq!(mask.get_pixel(1, 1).0[0], 255);
        assert_eq!(mask.pixels().filter(|p| p.0[0] == 255).count(), 1);
    }
}
