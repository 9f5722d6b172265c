// THEORY:
// Working images (masks, masked HSV copies) are needed on every frame with the
// same dimensions. A `ScratchImage` keeps one buffer alive for the session and
// hands it out again, reallocating only when the requested size differs from
// the cached one. Contents are never relied upon between frames: every user
// overwrites the whole buffer before reading it.

use image::{ImageBuffer, Pixel};

/// A reusable image buffer with resize-on-demand semantics.
#[derive(Debug)]
pub struct ScratchImage<P: Pixel> {
    buffer: ImageBuffer<P, Vec<P::Subpixel>>,
    allocations: usize,
}

impl<P: Pixel> Default for ScratchImage<P> {
    fn default() -> Self {
        Self { buffer: ImageBuffer::new(0, 0), allocations: 0 }
    }
}

impl<P: Pixel> ScratchImage<P> {
    /// Returns the cached buffer, reallocating it if its size does not match.
    pub fn get(&mut self, width: u32, height: u32) -> &mut ImageBuffer<P, Vec<P::Subpixel>> {
        if self.buffer.dimensions() != (width, height) {
            self.buffer = ImageBuffer::new(width, height);
            self.allocations += 1;
        }
        &mut self.buffer
    }

    /// Number of times the buffer has been (re)allocated.
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}
