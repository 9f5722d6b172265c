// THEORY:
// Recordings and calibration entries are keyed by wall-clock timestamps written
// as `YYYY-MM-DD_hh-mm-ss` (optionally with fractional seconds) at the start of
// file names and database records. Paint fading is keyed by whole days elapsed
// since the most recent repaint before a recording started. This module holds
// the small amount of calendar arithmetic both need.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::DateError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const TIMESTAMP_LEN: usize = 19;
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_LEN: usize = 10;
const SECONDS_PER_DAY: i64 = 86_400;
const PAINT_TAG: &str = "PAINT";

/// Parses a timestamp from the start of `text`. Trailing characters (file
/// extensions, camera suffixes) are ignored. A bare date means midnight.
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, DateError> {
    let unparsable = || DateError::Unparsable(text.to_string());

    if let Some(head) = text.get(..TIMESTAMP_LEN) {
        if let Ok(time) = NaiveDateTime::parse_from_str(head, TIMESTAMP_FORMAT) {
            return Ok(time + fractional_seconds(&text[TIMESTAMP_LEN..]));
        }
    }

    let head = text.get(..DATE_LEN).ok_or_else(unparsable)?;
    NaiveDate::parse_from_str(head, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(unparsable)
}

/// Reads `.123` style fractions; anything else counts as zero.
fn fractional_seconds(rest: &str) -> Duration {
    let Some(digits) = rest.strip_prefix('.') else {
        return Duration::zero();
    };
    let digits: String = digits.chars().take_while(char::is_ascii_digit).take(9).collect();
    if digits.is_empty() {
        return Duration::zero();
    }
    let scale = 10i64.pow(9 - digits.len() as u32);
    digits.parse::<i64>().map_or(Duration::zero(), |n| Duration::nanoseconds(n * scale))
}

/// Formats a timestamp the way it is parsed.
pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Collects `PAINT <timestamp>` records. Blank lines, `#` comments and records
/// of other kinds are skipped.
pub fn parse_paint_dates(text: &str) -> Result<Vec<NaiveDateTime>, DateError> {
    let mut dates = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(PAINT_TAG) {
            continue;
        }
        let stamp = tokens.next().ok_or_else(|| DateError::MalformedPaintLine(line.to_string()))?;
        dates.push(parse_timestamp(stamp)?);
    }
    Ok(dates)
}

/// Whole days between the latest paint date strictly before `start` and `start`.
pub fn days_since_last_paint(paint_dates: &[NaiveDateTime], start: NaiveDateTime) -> Result<i32, DateError> {
    let last = paint_dates
        .iter()
        .filter(|paint| **paint < start)
        .max()
        .ok_or(DateError::NoPaintBefore { start })?;
    Ok(((start - *last).num_seconds() / SECONDS_PER_DAY) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        match NaiveDate::from_ymd_opt(y, m, d).and_then(|date| date.and_hms_opt(h, min, s)) {
            Some(t) => t,
            None => panic!("invalid test date"),
        }
    }

    #[test]
    fn parses_full_and_date_only_stamps() {
        assert_eq!(parse_timestamp("2011-02-03_04-05-06").ok(), Some(at(2011, 2, 3, 4, 5, 6)));
        assert_eq!(parse_timestamp("2011-02-03_04-05-06_cam2.avi").ok(), Some(at(2011, 2, 3, 4, 5, 6)));
        assert_eq!(parse_timestamp("2011-02-03").ok(), Some(at(2011, 2, 3, 0, 0, 0)));
        assert!(parse_timestamp("video.avi").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn parses_fractional_seconds() {
        let t = parse_timestamp("2011-02-03_04-05-06.25");
        assert_eq!(t.ok(), Some(at(2011, 2, 3, 4, 5, 6) + Duration::milliseconds(250)));
        let ext = parse_timestamp("2011-02-03_04-05-06.avi");
        assert_eq!(ext.ok(), Some(at(2011, 2, 3, 4, 5, 6)));
    }

    #[test]
    fn paint_file_records() {
        let text = "# repaint log\n\nPAINT 2011-01-01_10-00-00\nNOTE something\nPAINT 2011-01-20\n";
        let dates = parse_paint_dates(text).unwrap_or_default();
        assert_eq!(dates, vec![at(2011, 1, 1, 10, 0, 0), at(2011, 1, 20, 0, 0, 0)]);
        assert!(parse_paint_dates("PAINT\n").is_err());
    }

    #[test]
    fn counts_whole_days_since_latest_earlier_paint() {
        let paints = [at(2011, 1, 1, 10, 0, 0), at(2011, 1, 20, 0, 0, 0), at(2011, 3, 1, 0, 0, 0)];
        let start = at(2011, 1, 25, 23, 59, 0);
        assert_eq!(days_since_last_paint(&paints, start).ok(), Some(5));
        assert_eq!(days_since_last_paint(&paints, at(2011, 1, 20, 0, 0, 0)).ok(), Some(18));
        assert!(days_since_last_paint(&paints, at(2010, 12, 31, 0, 0, 0)).is_err());
    }
}
