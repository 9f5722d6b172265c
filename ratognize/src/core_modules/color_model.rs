// THEORY:
// The `ColorModel` knows how the painted markers looked on the days for which
// calibration data exists, and predicts how they look on the day being analysed.
// Paint fades over the days after it is applied, so a fixed color would slowly
// drift out of its detection window.
//
// Key architectural principles:
// 1.  **Two Databases**: Day-light and night-light entries are kept apart. The
//     transient EXTRA and STRANGE light states borrow the DAY and NIGHT data.
// 2.  **Immutable After Load**: Entries are sorted once at construction (by day
//     index or by timestamp, depending on the selection method) and only queried
//     afterwards.
// 3.  **Strategies**: `SelectionMethod` picks one of three resolution strategies
//     behind a common `resolve` call: bracketing interpolation by day index, a
//     least-squares line through all entries, or bracketing interpolation by
//     calendar time.
// 4.  **Circular Hue**: Hue blending never goes "the long way around" the wheel.
//     Interpolation shifts the smaller hue by 180 when the pair is more than 90
//     apart, and the line fit shifts every low hue by 180 when the spread of the
//     series exceeds 90.
// 5.  **No Extrapolation By Interpolation**: Requests outside the database range
//     fail for the interpolating strategies. Only the line fit extrapolates.
//
// The numeric behavior (integer truncation points, f32 line parameters) is kept
// exactly as the downstream tools were calibrated against.

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::core_modules::color_filter::{ColorSpec, Hsv};
use crate::core_modules::light_classifier::LightState;
use crate::error::ColorModelError;

/// Maximum number of marker color slots.
pub const MAX_MARKERS: usize = 6;

const HUE_CIRCLE: i32 = 180;
const HUE_HALF_CIRCLE: i32 = 90;

/// Resolved colors for every marker slot plus the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSet {
    pub markers: [ColorSpec; MAX_MARKERS],
    pub background: ColorSpec,
}

/// One calibration point of the color database.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorModelEntry {
    /// Days since the markers were last painted.
    pub day: i32,
    /// Calendar time of the recording this entry was measured on.
    pub timestamp: Option<NaiveDateTime>,
    pub colors: ColorSet,
}

/// Strategy used to derive a color set for a requested day or date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Linear interpolation between the entries bracketing the day index.
    Interpolate,
    /// Least-squares line through all entries, evaluated at the day index.
    #[default]
    FitLinear,
    /// Linear interpolation between the entries bracketing the video start time.
    InterpolateDate,
}

/// The point in time a color set is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorQuery {
    pub days_since_paint: i32,
    pub video_start: Option<NaiveDateTime>,
}

impl SelectionMethod {
    /// Resolves a color set from entries pre-sorted for this method.
    pub fn resolve(
        self,
        entries: &[ColorModelEntry],
        used: &[bool; MAX_MARKERS],
        query: &ColorQuery,
    ) -> Result<ColorSet, ColorModelError> {
        // A single entry for exactly the requested day needs no machinery.
        if let [only] = entries {
            if only.day == query.days_since_paint {
                return Ok(only.colors);
            }
        }

        match self {
            Self::Interpolate => interpolate_by_day(entries, query.days_since_paint),
            Self::FitLinear => fit_linear(entries, used, query.days_since_paint),
            Self::InterpolateDate => {
                let start = query.video_start.ok_or(ColorModelError::MissingVideoStart)?;
                interpolate_by_date(entries, start)
            }
        }
    }
}

/// The day/night color database.
#[derive(Debug, Clone)]
pub struct ColorModel {
    day: Vec<ColorModelEntry>,
    night: Vec<ColorModelEntry>,
    method: SelectionMethod,
    used: [bool; MAX_MARKERS],
}

impl ColorModel {
    /// Builds the model, sorting both databases for the chosen method.
    pub fn new(
        mut day: Vec<ColorModelEntry>,
        mut night: Vec<ColorModelEntry>,
        method: SelectionMethod,
        used: [bool; MAX_MARKERS],
    ) -> Result<Self, ColorModelError> {
        for (light, entries) in [(LightState::Day, &mut day), (LightState::Night, &mut night)] {
            if entries.is_empty() {
                return Err(ColorModelError::EmptyDatabase { light });
            }
            if method == SelectionMethod::InterpolateDate {
                if let Some(e) = entries.iter().find(|e| e.timestamp.is_none()) {
                    return Err(ColorModelError::MissingTimestamp { light, day: e.day });
                }
                entries.sort_by_key(|e| e.timestamp);
            } else {
                entries.sort_by_key(|e| e.day);
            }
        }
        Ok(Self { day, night, method, used })
    }

    pub fn method(&self) -> SelectionMethod {
        self.method
    }

    pub fn used_markers(&self) -> &[bool; MAX_MARKERS] {
        &self.used
    }

    /// Sorted entries consulted for a light state.
    pub fn entries(&self, light: LightState) -> Result<&[ColorModelEntry], ColorModelError> {
        match light.color_source() {
            Some(LightState::Day) => Ok(&self.day),
            Some(_) => Ok(&self.night),
            None => Err(ColorModelError::UninitializedLight),
        }
    }

    /// Resolves the color set for a light state with the configured method.
    pub fn select(&self, light: LightState, query: &ColorQuery) -> Result<ColorSet, ColorModelError> {
        self.select_with(self.method, light, query)
    }

    /// Resolves the color set for a light state with an explicit method.
    pub fn select_with(
        &self,
        method: SelectionMethod,
        light: LightState,
        query: &ColorQuery,
    ) -> Result<ColorSet, ColorModelError> {
        method.resolve(self.entries(light)?, &self.used, query)
    }

    /// Colors predicted for every day between the first and the last entry.
    pub fn fading_colors(
        &self,
        method: SelectionMethod,
        light: LightState,
    ) -> Result<Vec<(i32, ColorSet)>, ColorModelError> {
        let entries = self.entries(light)?;
        let first = entries.iter().map(|e| e.day).min().unwrap_or(0);
        let last = entries.iter().map(|e| e.day).max().unwrap_or(0);
        (first..=last)
            .map(|day| {
                let query = ColorQuery { days_since_paint: day, video_start: None };
                method.resolve(entries, &self.used, &query).map(|set| (day, set))
            })
            .collect()
    }
}

/// Blends two specs with weights `wprev` (for `first`) and `w` (for `second`).
fn blend(first: &ColorSpec, second: &ColorSpec, wprev: f64, w: f64) -> ColorSpec {
    let mut d = f64::from(second.color.h);
    let mut dd = f64::from(first.color.h);
    if (d - dd).abs() > f64::from(HUE_HALF_CIRCLE) {
        if d < dd {
            d += f64::from(HUE_CIRCLE);
        } else {
            dd += f64::from(HUE_CIRCLE);
        }
    }
    let mix = |a: i32, b: i32| (w * f64::from(b) + wprev * f64::from(a)) as i32;

    ColorSpec {
        color: Hsv {
            h: (w * d + wprev * dd) as i32 % HUE_CIRCLE,
            s: mix(first.color.s, second.color.s),
            v: mix(first.color.v, second.color.v),
        },
        tolerance: Hsv {
            h: mix(first.tolerance.h, second.tolerance.h),
            s: mix(first.tolerance.s, second.tolerance.s),
            v: mix(first.tolerance.v, second.tolerance.v),
        },
    }
}

fn blend_sets(first: &ColorSet, second: &ColorSet, wprev: f64, w: f64) -> ColorSet {
    let mut out = ColorSet::default();
    for (slot, (a, b)) in out.markers.iter_mut().zip(first.markers.iter().zip(&second.markers)) {
        *slot = blend(a, b, wprev, w);
    }
    out.background = blend(&first.background, &second.background, wprev, w);
    out
}

fn interpolate_by_day(entries: &[ColorModelEntry], day: i32) -> Result<ColorSet, ColorModelError> {
    let last = entries.last().map_or(0, |e| e.day);
    let pos = entries
        .iter()
        .position(|e| e.day >= day)
        .ok_or(ColorModelError::DayTooLarge { day, last })?;
    let next = &entries[pos];

    if next.day == day {
        return Ok(next.colors);
    }
    if pos == 0 {
        return Err(ColorModelError::DayTooSmall { day, first: next.day });
    }

    let prev = &entries[pos - 1];
    let span = f64::from(next.day - prev.day);
    let w = f64::from(day - prev.day) / span;
    let wprev = f64::from(next.day - day) / span;
    Ok(blend_sets(&prev.colors, &next.colors, wprev, w))
}

fn interpolate_by_date(entries: &[ColorModelEntry], start: NaiveDateTime) -> Result<ColorSet, ColorModelError> {
    let pos = entries
        .iter()
        .position(|e| e.timestamp.is_some_and(|t| t >= start))
        .ok_or(ColorModelError::DateTooLate { start })?;
    let next = &entries[pos];
    let next_time = next.timestamp.ok_or(ColorModelError::DateTooLate { start })?;

    if pos == 0 && next_time > start {
        return Err(ColorModelError::DateTooEarly { start });
    }
    if next_time.date() == start.date() {
        return Ok(next.colors);
    }

    let prev = &entries[pos - 1];
    let prev_time = prev.timestamp.ok_or(ColorModelError::DateTooEarly { start })?;
    let span = (next_time - prev_time).num_seconds() as f64;
    let w = (start - prev_time).num_seconds() as f64 / span;
    let wprev = (next_time - start).num_seconds() as f64 / span;
    Ok(blend_sets(&prev.colors, &next.colors, wprev, w))
}

/// Ordinary least squares through integer points, returned as (intercept, slope).
fn fit_line(points: &[(i32, i32)]) -> (f32, f32) {
    let n = points.len() as f64;
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for &(x, y) in points {
        let (x, y) = (f64::from(x), f64::from(y));
        sx += x;
        sy += y;
        sxy += x * y;
        sxx += x * x;
    }
    let slope = ((n * sxy - sx * sy) / (n * sxx - sx * sx)) as f32;
    let intercept = ((sy - f64::from(slope) * sx) / n) as f32;
    (intercept, slope)
}

/// Fits one spec per channel across all entries.
fn fit_spec(entries: &[ColorModelEntry], pick: impl Fn(&ColorSet) -> &ColorSpec, day: i32) -> ColorSpec {
    let mut out = ColorSpec::default();
    let mut points = Vec::with_capacity(entries.len());

    for channel in 0..3 {
        let values = entries.iter().map(|e| pick(&e.colors).color.channel(channel));
        let offset = if channel == 0 {
            let min = values.clone().fold(HUE_CIRCLE, i32::min);
            let max = values.clone().fold(0, i32::max);
            if max - min > HUE_HALF_CIRCLE { HUE_CIRCLE } else { 0 }
        } else {
            0
        };

        points.clear();
        points.extend(entries.iter().zip(values).map(|(e, y)| {
            let y = if offset != 0 && y < HUE_HALF_CIRCLE { y + offset } else { y };
            (e.day, y)
        }));
        let tolerance_sum: i32 = entries.iter().map(|e| pick(&e.colors).tolerance.channel(channel)).sum();

        let (intercept, slope) = fit_line(&points);
        let mut value = (intercept + slope * day as f32) as i32;
        if offset != 0 {
            value %= offset;
        }
        out.color.set_channel(channel, value);
        out.tolerance.set_channel(channel, tolerance_sum / entries.len() as i32);
    }
    out
}

fn fit_linear(
    entries: &[ColorModelEntry],
    used: &[bool; MAX_MARKERS],
    day: i32,
) -> Result<ColorSet, ColorModelError> {
    if entries.len() < 2 {
        return Err(ColorModelError::TooFewEntries { found: entries.len() });
    }
    let mut out = ColorSet::default();
    for (slot, _) in used.iter().enumerate().filter(|(_, used)| **used) {
        out.markers[slot] = fit_spec(entries, |set| &set.markers[slot], day);
    }
    out.background = fit_spec(entries, |set| &set.background, day);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn spec(h: i32, tol: i32) -> ColorSpec {
        ColorSpec::new(Hsv::new(h, 150, 120), Hsv::new(tol, 60, 60))
    }

    fn entry(day: i32, hue: i32, tol: i32) -> ColorModelEntry {
        let mut colors = ColorSet::default();
        colors.markers[0] = spec(hue, tol);
        colors.markers[1] = spec((hue + 30) % 180, tol);
        colors.background = ColorSpec::new(Hsv::new(20, 40, 200), Hsv::new(15, 40, 55));
        ColorModelEntry { day, timestamp: None, colors }
    }

    fn dated(mut e: ColorModelEntry, d: u32, h: u32) -> ColorModelEntry {
        e.timestamp = NaiveDate::from_ymd_opt(2010, 3, d).and_then(|date| date.and_hms_opt(h, 0, 0));
        e
    }

    fn used() -> [bool; MAX_MARKERS] {
        [true, true, false, false, false, false]
    }

    fn model(entries: Vec<ColorModelEntry>, method: SelectionMethod) -> ColorModel {
        let night = entries.clone();
        match ColorModel::new(entries, night, method, used()) {
            Ok(m) => m,
            Err(e) => panic!("model construction failed: {e}"),
        }
    }

    fn query(day: i32) -> ColorQuery {
        ColorQuery { days_since_paint: day, video_start: None }
    }

    #[test]
    fn interpolates_midpoint() {
        let m = model(vec![entry(0, 90, 10), entry(10, 100, 10)], SelectionMethod::Interpolate);
        let marker = m.select(LightState::Day, &query(5)).map(|s| s.markers[0]).ok();
        assert_eq!(marker, Some(spec(95, 10)));
    }

    #[test]
    fn interpolation_wraps_hue() {
        let m = model(vec![entry(0, 170, 8), entry(10, 10, 8)], SelectionMethod::Interpolate);
        let set = m.select(LightState::Night, &query(5));
        assert_eq!(set.map(|s| s.markers[0].color.h).ok(), Some(0));
    }

    #[test]
    fn entry_points_are_idempotent_for_every_method() {
        let entries = vec![entry(0, 90, 10), entry(10, 100, 10)];
        for method in [SelectionMethod::Interpolate, SelectionMethod::FitLinear] {
            let m = model(entries.clone(), method);
            for e in &entries {
                let set = m.select(LightState::Day, &query(e.day));
                assert_eq!(set.as_ref().map(|s| s.markers[..2].to_vec()).ok(), Some(e.colors.markers[..2].to_vec()));
                assert_eq!(set.map(|s| s.background).ok(), Some(e.colors.background));
            }
        }

        let dated_entries = vec![dated(entry(0, 90, 10), 1, 12), dated(entry(10, 100, 10), 11, 12)];
        let m = model(dated_entries.clone(), SelectionMethod::InterpolateDate);
        for e in &dated_entries {
            let q = ColorQuery { days_since_paint: 0, video_start: e.timestamp };
            assert_eq!(m.select(LightState::Day, &q).ok(), Some(e.colors));
        }
    }

    #[test]
    fn interpolation_refuses_to_extrapolate() {
        let m = model(vec![entry(3, 90, 10), entry(10, 100, 10)], SelectionMethod::Interpolate);
        assert!(matches!(
            m.select(LightState::Day, &query(11)),
            Err(ColorModelError::DayTooLarge { day: 11, last: 10 })
        ));
        assert!(matches!(
            m.select(LightState::Day, &query(1)),
            Err(ColorModelError::DayTooSmall { day: 1, first: 3 })
        ));
    }

    #[test]
    fn single_matching_entry_is_copied_for_any_method() {
        let m = model(vec![entry(4, 33, 7)], SelectionMethod::FitLinear);
        assert_eq!(m.select(LightState::Day, &query(4)).map(|s| s.markers[0]).ok(), Some(spec(33, 7)));
        assert!(matches!(
            m.select(LightState::Day, &query(5)),
            Err(ColorModelError::TooFewEntries { found: 1 })
        ));
    }

    #[test]
    fn uninitialized_light_is_rejected() {
        let m = model(vec![entry(0, 90, 10)], SelectionMethod::Interpolate);
        assert!(matches!(
            m.select(LightState::Uninitialized, &query(0)),
            Err(ColorModelError::UninitializedLight)
        ));
    }

    #[test]
    fn fit_extrapolates_along_the_line() {
        let m = model(vec![entry(0, 90, 10), entry(10, 100, 20)], SelectionMethod::FitLinear);
        let set = m.select(LightState::Extra, &query(20));
        let marker = set.map(|s| s.markers[0]).ok();
        assert_eq!(marker.map(|s| s.color.h), Some(110));
        // Tolerances are averaged, not fitted.
        assert_eq!(marker.map(|s| s.tolerance.h), Some(15));
        assert_eq!(marker.map(|s| s.color.s), Some(150));
    }

    #[test]
    fn fit_handles_hue_wrap() {
        let m = model(
            vec![entry(0, 176, 10), entry(10, 2, 10), entry(20, 8, 10)],
            SelectionMethod::FitLinear,
        );
        let hue = m.select(LightState::Day, &query(30)).map(|s| s.markers[0].color.h).ok();
        // Points (0,176) (10,182) (20,188) lie on a line reaching 194 at day 30.
        assert_eq!(hue, Some(14));
    }

    #[test]
    fn fit_skips_unused_slots() {
        let m = model(vec![entry(0, 90, 10), entry(10, 100, 10)], SelectionMethod::FitLinear);
        let set = m.select(LightState::Day, &query(5));
        assert_eq!(set.map(|s| s.markers[2]).ok(), Some(ColorSpec::default()));
    }

    #[test]
    fn date_interpolation_weights_by_seconds() {
        let entries = vec![dated(entry(0, 90, 10), 1, 0), dated(entry(0, 100, 20), 11, 0)];
        let m = model(entries, SelectionMethod::InterpolateDate);
        let start = NaiveDate::from_ymd_opt(2010, 3, 6).and_then(|d| d.and_hms_opt(0, 0, 0));
        let q = ColorQuery { days_since_paint: 0, video_start: start };
        let marker = m.select(LightState::Day, &q).map(|s| s.markers[0]).ok();
        assert_eq!(marker.map(|s| (s.color.h, s.tolerance.h)), Some((95, 15)));
    }

    #[test]
    fn date_interpolation_same_day_shortcut_and_range() {
        let entries = vec![dated(entry(0, 90, 10), 1, 18), dated(entry(0, 100, 10), 11, 6)];
        let m = model(entries, SelectionMethod::InterpolateDate);

        let same_day = NaiveDate::from_ymd_opt(2010, 3, 11).and_then(|d| d.and_hms_opt(1, 0, 0));
        let q = ColorQuery { days_since_paint: 0, video_start: same_day };
        assert_eq!(m.select(LightState::Day, &q).map(|s| s.markers[0].color.h).ok(), Some(100));

        let early = NaiveDate::from_ymd_opt(2010, 3, 1).and_then(|d| d.and_hms_opt(6, 0, 0));
        let q = ColorQuery { days_since_paint: 0, video_start: early };
        assert!(matches!(m.select(LightState::Day, &q), Err(ColorModelError::DateTooEarly { .. })));

        let late = NaiveDate::from_ymd_opt(2010, 3, 12).and_then(|d| d.and_hms_opt(0, 0, 0));
        let q = ColorQuery { days_since_paint: 0, video_start: late };
        assert!(matches!(m.select(LightState::Day, &q), Err(ColorModelError::DateTooLate { .. })));

        assert!(matches!(
            m.select(LightState::Day, &ColorQuery::default()),
            Err(ColorModelError::MissingVideoStart)
        ));
    }

    #[test]
    fn construction_validates_databases() {
        let day = vec![entry(0, 90, 10)];
        assert!(matches!(
            ColorModel::new(day.clone(), Vec::new(), SelectionMethod::Interpolate, used()),
            Err(ColorModelError::EmptyDatabase { light: LightState::Night })
        ));
        assert!(matches!(
            ColorModel::new(day.clone(), day, SelectionMethod::InterpolateDate, used()),
            Err(ColorModelError::MissingTimestamp { light: LightState::Day, day: 0 })
        ));
    }

    #[test]
    fn entries_are_sorted_by_day() {
        let m = model(vec![entry(10, 100, 10), entry(0, 90, 10)], SelectionMethod::Interpolate);
        let days: Vec<i32> = m.entries(LightState::Day).map(|e| e.iter().map(|x| x.day).collect()).unwrap_or_default();
        assert_eq!(days, vec![0, 10]);
    }

    #[test]
    fn fading_table_covers_database_range() {
        let m = model(vec![entry(2, 90, 10), entry(6, 98, 10)], SelectionMethod::Interpolate);
        let rows = m.fading_colors(SelectionMethod::Interpolate, LightState::Day).unwrap_or_default();
        let hues: Vec<(i32, i32)> = rows.iter().map(|(d, s)| (*d, s.markers[0].color.h)).collect();
        assert_eq!(hues, vec![(2, 90), (3, 92), (4, 94), (5, 96), (6, 98)]);
    }
}
