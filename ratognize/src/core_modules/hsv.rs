// THEORY (8-bit HSV):
// Every color in the historical database is expressed in the compact 8-bit HSV
// convention used by common vision toolkits: hue is halved to fit 0..180,
// saturation and value span 0..255. Frames are converted once per frame and the
// result is stored in a 3-channel buffer whose channels are (H, S, V).
//
// The conversion follows the usual sector formula: the dominant channel picks a
// 120-degree sector and the difference of the other two places the hue inside it.

use image::{Rgb, RgbImage};

/// A 3-channel image holding (H, S, V) per pixel, H in 0..180.
pub type HsvImage = RgbImage;

/// Converts one RGB pixel to 8-bit HSV.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let maximum_channel = r.max(g.max(b));
    let minimum_channel = r.min(g.min(b));
    let chroma = maximum_channel - minimum_channel;

    let value = maximum_channel;
    let saturation = if maximum_channel > 0.0 { 255.0 * chroma / maximum_channel } else { 0.0 };

    if chroma <= 0.0 {
        return [0, saturation.round() as u8, value as u8];
    }

    let (base_difference, sector_offset) = if maximum_channel == r {
        (g - b, 0.0)
    } else if maximum_channel == g {
        (b - r, 120.0)
    } else {
        (r - g, 240.0)
    };

    let mut hue_degrees = 60.0 * base_difference / chroma + sector_offset;
    if hue_degrees < 0.0 {
        hue_degrees += 360.0;
    }
    let hue = (hue_degrees / 2.0).round() as u32 % 180;

    [hue as u8, saturation.round() as u8, value as u8]
}

/// Converts a whole frame into a newly allocated HSV buffer.
pub fn convert_rgb_to_hsv(frame: &RgbImage) -> HsvImage {
    let mut hsv = HsvImage::new(frame.width(), frame.height());
    convert_rgb_to_hsv_into(frame, &mut hsv);
    hsv
}

/// Converts a frame into an existing buffer of the same size.
pub fn convert_rgb_to_hsv_into(frame: &RgbImage, hsv: &mut HsvImage) {
    debug_assert_eq!(frame.dimensions(), hsv.dimensions());
    for (src, dst) in frame.pixels().zip(hsv.pixels_mut()) {
        *dst = Rgb(rgb_to_hsv(src.0));
    }
}
