// THEORY:
// The `.blobs` file records every particle of every frame for the offline
// trajectory resolver. Coordinates are written in full-frame pixels (the region
// of interest offset is added back), orientations in degrees, and all floats with
// one decimal. Each frame produces an optional `MD` line, a `RAT` line and a
// `BLOB` or `BLOBE` line.

use std::io::{self, Write};

use crate::core_modules::particle::Particle;

/// Which record layout marker particles are written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerLayout {
    /// `{class cx cy r}`
    Circle,
    /// `{class cx cy A B deg}`
    Ellipse,
}

/// The particles of one frame, ready for output.
#[derive(Debug, Clone, Copy)]
pub struct FrameBlobs<'a> {
    pub frame: u64,
    /// Motion particles; `None` when motion detection is disabled.
    pub motion: Option<&'a [Particle]>,
    pub creatures: &'a [Particle],
    pub markers: &'a [Particle],
}

/// Writer for `.blobs` files.
#[derive(Debug)]
pub struct BlobFileWriter<W: Write> {
    out: W,
    layout: MarkerLayout,
    offset: (f64, f64),
}

impl<W: Write> BlobFileWriter<W> {
    pub fn new(out: W, layout: MarkerLayout, roi_origin: (u32, u32)) -> Self {
        Self { out, layout, offset: (f64::from(roi_origin.0), f64::from(roi_origin.1)) }
    }

    pub fn write_header(&mut self, motion_enabled: bool) -> io::Result<()> {
        if motion_enabled {
            writeln!(
                self.out,
                "# MD line format (assuming ellipse): framenum\tMD\tMDBlobCount\t{{centerx\tcentery\taxisA\taxisB\torientation}}\t{{..."
            )?;
        }
        writeln!(
            self.out,
            "# RAT line format (assuming ellipse): framenum\tRAT\tRATBlobCount\t{{centerx\tcentery\taxisA\taxisB\torientation}}\t{{..."
        )?;
        match self.layout {
            MarkerLayout::Ellipse => writeln!(
                self.out,
                "# BLOBE line format (assuming ellipse): framenum\tBLOB\tBlobCount\t{{color\tcenterx\tcentery\taxisA\taxisB\torientation}}\t{{..."
            ),
            MarkerLayout::Circle => writeln!(
                self.out,
                "# BLOB line format (assuming circle): framenum\tBLOB\tBlobCount\t{{color\tcenterx\tcentery\tradius}}\t{{..."
            ),
        }
    }

    pub fn write_frame(&mut self, blobs: &FrameBlobs<'_>) -> io::Result<()> {
        if let Some(motion) = blobs.motion {
            self.write_ellipses(blobs.frame, "MD", motion)?;
        }
        self.write_ellipses(blobs.frame, "RAT", blobs.creatures)?;

        let (dx, dy) = self.offset;
        match self.layout {
            MarkerLayout::Ellipse => {
                write!(self.out, "{}\tBLOBE\t{}\t", blobs.frame, blobs.markers.len())?;
                for p in blobs.markers {
                    write!(
                        self.out,
                        "{{{}\t{:.1}\t{:.1}\t{:.1}\t{:.1}\t{:.1}}}\t",
                        p.class,
                        p.center.0 + dx,
                        p.center.1 + dy,
                        p.axis_a,
                        p.axis_b,
                        p.orientation_degrees()
                    )?;
                }
            }
            MarkerLayout::Circle => {
                write!(self.out, "{}\tBLOB\t{}\t", blobs.frame, blobs.markers.len())?;
                for p in blobs.markers {
                    write!(
                        self.out,
                        "{{{}\t{:.1}\t{:.1}\t{:.1}}}\t",
                        p.class,
                        p.center.0 + dx,
                        p.center.1 + dy,
                        p.radius
                    )?;
                }
            }
        }
        writeln!(self.out)
    }

    fn write_ellipses(&mut self, frame: u64, tag: &str, particles: &[Particle]) -> io::Result<()> {
        let (dx, dy) = self.offset;
        write!(self.out, "{frame}\t{tag}\t{}\t", particles.len())?;
        for p in particles {
            write!(
                self.out,
                "{{{:.1}\t{:.1}\t{:.1}\t{:.1}\t{:.1}}}\t",
                p.center.0 + dx,
                p.center.1 + dy,
                p.axis_a,
                p.axis_b,
                p.orientation_degrees()
            )?;
        }
        writeln!(self.out)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
