// THEORY:
// The `BlobExtractor` is the engine of the spatial grouping stage. It takes a
// binary mask produced by a color or motion filter and reduces every connected
// foreground region to a `Particle`.
//
// Key architectural principles & algorithm steps:
// 1.  **Outer Components Only**: Regions are found by tracing borders. Only outer
//     borders without a parent are kept, so holes and regions nested inside holes
//     never produce particles of their own.
// 2.  **Moments From Boundaries**: Each traced border is treated as a polygon and
//     its moments feed the `geometry` module.
// 3.  **Acceptance Windows**: A region is accepted when its area lies inside the
//     configured window and, if a ceiling is set, its elongation does not exceed
//     it. Regions above the window and regions just below it (within 80% of the
//     minimum) are counted as outliers for diagnostics. Everything smaller is
//     noise and is dropped silently.
// 4.  **Bounded Cost**: A pass stops as soon as its budget of accepted particles
//     is reached. Noisy thresholds can produce thousands of specks and the budget
//     keeps a bad frame from dominating the run time. Border tracing still
//     covers the whole mask; the budget bounds only the moment and geometry work.
// 5.  **Stateless Utility**: Extraction has no memory of previous frames. The
//     caller owns the particle collection and the outlier statistics.

use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};

use crate::core_modules::geometry::{GeometryOptions, Moments, particle_from_moments};
use crate::core_modules::particle::Particle;

const UNDERSIZE_FRACTION: f64 = 0.8; // regions above this share of the minimum area are "almost" blobs

/// Parameters of a single extraction pass.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionParams {
    /// Smallest accepted area.
    pub area_min: f64,
    /// Largest accepted area.
    pub area_max: f64,
    /// Largest accepted major/minor axis ratio. `None` disables the check.
    pub elongation_max: Option<f64>,
    /// Maximum number of particles this pass may accept.
    pub budget: usize,
    /// Class index attached to every accepted particle.
    pub class: usize,
    pub geometry: GeometryOptions,
}

/// How a single region's area relates to the acceptance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaClass {
    Within,
    Oversize,
    Undersize,
    Noise,
}

/// Places an area relative to `[area_min, area_max]`.
pub fn classify_area(area: f64, area_min: f64, area_max: f64) -> AreaClass {
    if area > area_max {
        AreaClass::Oversize
    } else if area >= area_min {
        AreaClass::Within
    } else if area > UNDERSIZE_FRACTION * area_min {
        AreaClass::Undersize
    } else {
        AreaClass::Noise
    }
}

/// Size-violation statistics of one extraction pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierStats {
    pub oversize_count: usize,
    /// Largest oversize area seen. Starts at the window minimum.
    pub oversize_max: f64,
    pub undersize_count: usize,
    /// Smallest undersize area seen. Starts at the window maximum.
    pub undersize_min: f64,
}

impl OutlierStats {
    fn new(params: &ExtractionParams) -> Self {
        Self {
            oversize_count: 0,
            oversize_max: params.area_min,
            undersize_count: 0,
            undersize_min: params.area_max,
        }
    }
}

/// Result summary of one extraction pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extraction {
    /// Number of particles appended by this pass.
    pub accepted: usize,
    pub outliers: OutlierStats,
}

/// Moments of every outer connected component, in border-scan order.
pub fn component_moments(mask: &GrayImage) -> impl Iterator<Item = Moments> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| Moments::from_polygon(&c.points))
}

/// Largest component area in a mask, 0 if the mask is empty.
pub fn max_component_area(mask: &GrayImage) -> f64 {
    component_moments(mask).map(|m| m.m00).fold(0.0, f64::max)
}

/// Extracts particles from `mask`, appending accepted ones to `particles`.
pub fn extract_blobs(
    mask: &GrayImage,
    params: &ExtractionParams,
    particles: &mut Vec<Particle>,
) -> Extraction {
    let mut outliers = OutlierStats::new(params);
    let mut accepted = 0;

    for moments in component_moments(mask) {
        if accepted >= params.budget {
            break;
        }

        let area = moments.m00;
        match classify_area(area, params.area_min, params.area_max) {
            AreaClass::Within => {
                let particle = particle_from_moments(&moments, params.geometry, params.class);
                let elongation_ok = match params.elongation_max {
                    None => true,
                    Some(ceiling) => particle.axis_b != 0.0 && particle.elongation() <= ceiling,
                };
                if elongation_ok {
                    particles.push(particle);
                    accepted += 1;
                }
            }
            AreaClass::Oversize => {
                outliers.oversize_count += 1;
                outliers.oversize_max = outliers.oversize_max.max(area);
            }
            AreaClass::Undersize => {
                outliers.undersize_count += 1;
                outliers.undersize_min = outliers.undersize_min.min(area);
            }
            AreaClass::Noise => {}
        }
    }

    Extraction { accepted, outliers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn params(area_min: f64, area_max: f64, budget: usize) -> ExtractionParams {
        ExtractionParams {
            area_min,
            area_max,
            elongation_max: None,
            budget,
            class: 4,
            geometry: GeometryOptions::default(),
        }
    }

    /// Draws an n x n filled square; its traced boundary encloses (n-1)^2.
    fn square(mask: &mut GrayImage, x: i32, y: i32, n: u32) {
        draw_filled_rect_mut(mask, Rect::at(x, y).of_size(n, n), Luma([255]));
    }

    #[test]
    fn area_partition_is_exhaustive_and_disjoint() {
        use AreaClass::*;
        let cases = [
            (0.0, Noise),
            (50.0, Noise),
            (80.0, Noise),
            (80.5, Undersize),
            (99.9, Undersize),
            (100.0, Within),
            (250.0, Within),
            (400.0, Within),
            (400.1, Oversize),
            (1e6, Oversize),
        ];
        for (area, expected) in cases {
            assert_eq!(classify_area(area, 100.0, 400.0), expected, "area {area}");
        }
    }

    #[test]
    fn accepts_regions_in_window_and_tags_class() {
        let mut mask = GrayImage::new(100, 60);
        square(&mut mask, 10, 10, 11); // area 100
        square(&mut mask, 50, 10, 21); // area 400
        let mut particles = Vec::new();
        let result = extract_blobs(&mask, &params(50.0, 200.0, 10), &mut particles);

        assert_eq!(result.accepted, 1);
        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].class, 4);
        approx::assert_relative_eq!(particles[0].center.0, 15.0);
        approx::assert_relative_eq!(particles[0].center.1, 15.0);
        assert_eq!(result.outliers.oversize_count, 1);
        approx::assert_relative_eq!(result.outliers.oversize_max, 400.0);
        assert_eq!(result.outliers.undersize_count, 0);
    }

    #[test]
    fn counts_undersize_but_ignores_specks() {
        let mut mask = GrayImage::new(80, 40);
        square(&mut mask, 5, 5, 10); // area 81, within 80% of 100
        square(&mut mask, 40, 5, 5); // area 16, noise
        let mut particles = Vec::new();
        let result = extract_blobs(&mask, &params(100.0, 200.0, 10), &mut particles);

        assert!(particles.is_empty());
        assert_eq!(result.outliers.undersize_count, 1);
        approx::assert_relative_eq!(result.outliers.undersize_min, 81.0);
        assert_eq!(result.outliers.oversize_count, 0);
        approx::assert_relative_eq!(result.outliers.oversize_max, 100.0);
    }

    #[test]
    fn never_exceeds_budget() {
        let mut mask = GrayImage::new(200, 20);
        for i in 0..8 {
            square(&mut mask, 5 + i * 20, 5, 8);
        }
        let mut particles = Vec::new();
        let result = extract_blobs(&mask, &params(10.0, 100.0, 3), &mut particles);
        assert_eq!(result.accepted, 3);
        assert_eq!(particles.len(), 3);
    }

    #[test]
    fn elongation_ceiling_rejects_thin_bars() {
        let mut mask = GrayImage::new(120, 40);
        draw_filled_rect_mut(&mut mask, Rect::at(5, 5).of_size(101, 5), Luma([255]));
        let mut particles = Vec::new();
        let mut p = params(50.0, 1000.0, 10);
        p.elongation_max = Some(3.0);
        let result = extract_blobs(&mask, &p, &mut particles);
        assert_eq!(result.accepted, 0);
        assert_eq!(result.outliers.oversize_count + result.outliers.undersize_count, 0);

        p.elongation_max = None;
        extract_blobs(&mask, &p, &mut particles);
        assert_eq!(particles.len(), 1);
    }

    #[test]
    fn nested_regions_are_not_reported() {
        let mut mask = GrayImage::new(60, 60);
        square(&mut mask, 5, 5, 41);
        draw_filled_rect_mut(&mut mask, Rect::at(15, 15).of_size(21, 21), Luma([0]));
        square(&mut mask, 20, 20, 11); // island inside the hole
        let areas: Vec<f64> = component_moments(&mask).map(|m| m.m00).collect();
        assert_eq!(areas.len(), 1);
        approx::assert_relative_eq!(max_component_area(&mask), 1600.0);
    }
}
