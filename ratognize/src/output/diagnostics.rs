// THEORY:
// The diagnostic log is product output, not operational logging. Downstream
// tools parse it, so every line kind keeps a fixed tab-separated layout:
//
//   <frame>\tFIRSTFRAME
//   <frame>\tLASTFRAME
//   <frame>\tLED\t<STATE>
//   <frame>\tAVG\t<R>\t<G>\t<B>\t<votes>\t<maxLEDblobArea>
//   <frame>\tBLOBOVERSIZE\t<class>\t<count>\t<maxArea>
//   <frame>\tBLOBUNDERSIZE\t<class>\t<count>
//
// Floating-point fields use the shortest "%g" rendering with six significant
// digits, which keeps the files identical to those produced by earlier tools.

use std::io::{self, Write};

use crate::core_modules::blob_extractor::OutlierStats;
use crate::core_modules::light_classifier::{LightReading, LightState};

const SIGNIFICANT_DIGITS: i32 = 6;

/// Writer for the tab-separated diagnostic log.
#[derive(Debug)]
pub struct DiagnosticLog<W: Write> {
    out: W,
}

impl<W: Write> DiagnosticLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes the `#` comment block describing the line kinds.
    pub fn write_header(&mut self, created: &str, invocation: &str) -> io::Result<()> {
        writeln!(self.out, "# ratognize log file created on: {created}")?;
        writeln!(self.out, "# file was called like this: {invocation}")?;
        writeln!(self.out)?;
        writeln!(self.out, "# Log file format: frame warningtype params")?;
        writeln!(self.out, "# Log file entry types:")?;
        writeln!(self.out, "#   FIRSTFRAME/LASTFRAME -- frame number of first and last frame read from file")?;
        writeln!(
            self.out,
            "#   LED newstate -- led state has changed (possible values: DAYLIGHT, NIGHTLIGHT, EXTRALIGHT, STRANGELIGHT)."
        )?;
        writeln!(
            self.out,
            "#   AVG avgR avgG avgB votes_for_daylight maxLEDblobsize -- average intensity of image channels + other params"
        )?;
        writeln!(
            self.out,
            "#   BLOBOVERSIZE color/MD/RAT num maxsize -- There are blobs greater than the maximum size allowed."
        )?;
        writeln!(
            self.out,
            "#   BLOBUNDERSIZE color/MD/RAT num -- There are blobs too small but larger than 80% of the minimum size allowed."
        )?;
        writeln!(self.out)
    }

    pub fn first_frame(&mut self, frame: u64) -> io::Result<()> {
        writeln!(self.out, "{frame}\tFIRSTFRAME")
    }

    pub fn last_frame(&mut self, frame: u64) -> io::Result<()> {
        writeln!(self.out, "{frame}\tLASTFRAME")
    }

    pub fn light_change(&mut self, frame: u64, state: LightState) -> io::Result<()> {
        writeln!(self.out, "{frame}\tLED\t{state}")
    }

    pub fn light_reading(&mut self, frame: u64, reading: &LightReading) -> io::Result<()> {
        let [r, g, b] = reading.average;
        writeln!(
            self.out,
            "{frame}\tAVG\t{}\t{}\t{}\t{}\t{}",
            fmt_g(r),
            fmt_g(g),
            fmt_g(b),
            reading.votes,
            fmt_g(reading.max_blob_area)
        )
    }

    /// Writes one line per outlier category that actually occurred.
    pub fn outliers(&mut self, frame: u64, class: &str, stats: &OutlierStats) -> io::Result<()> {
        if stats.oversize_count > 0 {
            writeln!(
                self.out,
                "{frame}\tBLOBOVERSIZE\t{class}\t{}\t{}",
                stats.oversize_count,
                fmt_g(stats.oversize_max)
            )?;
        }
        if stats.undersize_count > 0 {
            writeln!(self.out, "{frame}\tBLOBUNDERSIZE\t{class}\t{}", stats.undersize_count)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Label of a marker class in outlier lines.
pub fn marker_class_label(slot: usize, name: &str) -> String {
    format!("c{slot}-{name}")
}

/// Renders a float like C's `%g`: six significant digits, trailing zeros
/// removed, scientific notation for very large or small magnitudes.
pub fn fmt_g(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0".into() } else { "0".into() };
    }

    // Round to the target precision first; rounding can bump the exponent.
    let sci = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, x);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exponent < -4 || exponent >= SIGNIFICANT_DIGITS {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.abs())
    } else {
        let decimals = (SIGNIFICANT_DIGITS - 1 - exponent) as usize;
        trim_fraction(&format!("{x:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') { s.trim_end_matches('0').trim_end_matches('.') } else { s }
}
