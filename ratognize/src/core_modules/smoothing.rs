// THEORY:
// Optional Gaussian pre-smoothing of decoded frames. It runs before the HSV
// conversion, so both the color passes and the motion accumulator see the
// smoothed image. The strength is given as an odd kernel size and mapped to a
// standard deviation with the usual aperture rule, so historical settings
// carry over unchanged. A kernel size of 0 disables it.

use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;

/// Standard deviation of a Gaussian with the given odd aperture.
pub fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Smooths `frame` with a Gaussian of aperture `kernel`; 0 returns it as is.
pub fn presmooth(frame: RgbImage, kernel: u32) -> RgbImage {
    if kernel == 0 {
        return frame;
    }
    gaussian_blur_f32(&frame, kernel_sigma(kernel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;

    fn dot() -> RgbImage {
        let mut frame = RgbImage::new(9, 9);
        frame.put_pixel(4, 4, Rgb([255, 255, 255]));
        frame
    }

    #[test]
    fn zero_kernel_leaves_frame_untouched() {
        assert_eq!(presmooth(dot(), 0), dot());
    }

    #[test]
    fn aperture_maps_to_sigma() {
        assert_relative_eq!(kernel_sigma(3), 0.8, epsilon = 1e-6);
        assert_relative_eq!(kernel_sigma(5), 1.1, epsilon = 1e-6);
    }

    #[test]
    fn smoothing_spreads_a_bright_dot() {
        let smoothed = presmooth(dot(), 5);
        assert_eq!(smoothed.dimensions(), (9, 9));
        assert!(smoothed.get_pixel(4, 4).0[0] < 255);
        assert!(smoothed.get_pixel(5, 4).0[0] > 0);
    }
}
