// THEORY:
// The fading report (`.colors` file) shows how the color model predicts each
// marker's color to drift over the covered days, for both day and night light
// and for both day-indexed strategies. It is a calibration aid written once per
// run, before any frame is processed.

use std::io::Write;

use crate::core_modules::color_model::{ColorModel, MAX_MARKERS, SelectionMethod};
use crate::core_modules::light_classifier::LightState;
use crate::datetime::format_timestamp;
use crate::error::Result;

const CHANNEL_TAGS: [char; 3] = ['H', 'S', 'V'];

/// Writes the fading table for every (method, light) combination.
pub fn write_fade_report<W: Write>(out: &mut W, model: &ColorModel, marker_names: &[&str]) -> Result<()> {
    let methods = [(SelectionMethod::Interpolate, "interpolate"), (SelectionMethod::FitLinear, "fit_linear")];
    for (method, method_name) in methods {
        for light in [LightState::Day, LightState::Night] {
            writeln!(out, "# {light} color settings")?;
            writeln!(out, "# METHOD:{method_name}")?;
            write!(out, "day\tfrom_date")?;
            for slot in 0..MAX_MARKERS {
                let name = marker_names.get(slot).copied().unwrap_or("");
                for tag in CHANNEL_TAGS {
                    write!(out, "\t{name}_{tag}\t{name}_{tag}R")?;
                }
            }
            writeln!(out)?;

            let entries = model.entries(light)?;
            for (day, colors) in model.fading_colors(method, light)? {
                write!(out, "{day}")?;
                match entries.iter().find(|e| e.day == day).and_then(|e| e.timestamp) {
                    Some(time) => write!(out, "\t{}", format_timestamp(&time))?,
                    None => write!(out, "\t-")?,
                }
                for spec in &colors.markers {
                    for channel in 0..3 {
                        write!(out, "\t{}\t{}", spec.color.channel(channel), spec.tolerance.channel(channel))?;
                    }
                }
                writeln!(out)?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::color_filter::{ColorSpec, Hsv};
    use crate::core_modules::color_model::{ColorModelEntry, ColorSet};

    fn entry(day: i32, hue: i32) -> ColorModelEntry {
        let mut colors = ColorSet::default();
        colors.markers[0] = ColorSpec::new(Hsv::new(hue, 100, 100), Hsv::new(10, 20, 30));
        ColorModelEntry { day, timestamp: None, colors }
    }

    #[test]
    fn report_rows_span_database_days() {
        let used = [true, false, false, false, false, false];
        let model = match ColorModel::new(
            vec![entry(0, 40), entry(2, 44)],
            vec![entry(1, 90), entry(3, 96)],
            SelectionMethod::Interpolate,
            used,
        ) {
            Ok(m) => m,
            Err(e) => panic!("{e}"),
        };
        let mut out = Vec::new();
        assert!(write_fade_report(&mut out, &model, &["red"]).is_ok());
        let text = String::from_utf8_lossy(&out).into_owned();

        assert!(text.starts_with("# DAYLIGHT color settings\n# METHOD:interpolate\nday\tfrom_date\tred_H\tred_HR"));
        assert!(text.contains("\n1\t-\t42\t10\t100\t20\t100\t30\t0\t0"));
        assert!(text.contains("# NIGHTLIGHT color settings\n# METHOD:fit_linear"));
        // Two lights x two methods, three days each.
        let data_rows = text.lines().filter(|l| l.chars().next().is_some_and(|c| c.is_ascii_digit())).count();
        assert_eq!(data_rows, 12);
    }
}
