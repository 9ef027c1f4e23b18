//! RGB frame helpers built on `image::RgbImage`.

use image::{Rgb, RgbImage};

use crate::geometry::{AffineTransform, Rect, Size};

/// Bytes per packed RGB24 pixel.
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Packed RGB24 buffer length for a frame.
pub fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGB_BYTES_PER_PIXEL
}

/// A frame filled with one colour.
pub fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

/// Re-orient a decoded frame into its displayed orientation.
///
/// The output covers the bounding box of the transformed frame; every output
/// pixel is sampled (nearest neighbour) from the source through the inverse
/// transform, and pixels that fall outside the source are filled with
/// `fill`. Quarter turns and mirrors are exact pixel permutations.
pub fn apply_transform(frame: &RgbImage, transform: &AffineTransform, fill: [u8; 3]) -> RgbImage {
    if transform.is_identity() {
        return frame.clone();
    }
    let natural = Size::from_pixels(frame.width(), frame.height());
    let bounds = transform.apply_to_rect(&Rect::from_size(natural));
    let (out_w, out_h) = bounds.size().to_pixels();

    let inverse = match transform.invert() {
        Some(inverse) => inverse,
        None => return solid_frame(out_w, out_h, fill),
    };

    let mut out = solid_frame(out_w, out_h, fill);
    let (src_w, src_h) = (frame.width() as f64, frame.height() as f64);
    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply(
            bounds.x + ox as f64 + 0.5,
            bounds.y + oy as f64 + 0.5,
        );
        if sx >= 0.0 && sy >= 0.0 && sx < src_w && sy < src_h {
            *pixel = *frame.get_pixel(sx as u32, sy as u32);
        }
    }
    out
}

/// Mean colour of a rectangular region, or `None` when the region is empty.
pub fn mean_color(frame: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> Option<[u8; 3]> {
    let x1 = (x + width).min(frame.width());
    let y1 = (y + height).min(frame.height());
    if x >= x1 || y >= y1 {
        return None;
    }
    let mut sums = [0u64; 3];
    for py in y..y1 {
        for px in x..x1 {
            let p = frame.get_pixel(px, py);
            for (sum, channel) in sums.iter_mut().zip(p.0) {
                *sum += channel as u64;
            }
        }
    }
    let count = ((x1 - x) * (y1 - y)) as u64;
    Some(sums.map(|s| (s / count) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2x1 frame: left red, right blue.
    fn two_pixel_frame() -> RgbImage {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, Rgb([255, 0, 0]));
        frame.put_pixel(1, 0, Rgb([0, 0, 255]));
        frame
    }

    #[test]
    fn quarter_turn_swaps_axes_and_moves_pixels() {
        let rotated = apply_transform(&two_pixel_frame(), &AffineTransform::rotation(90.0), [0; 3]);
        assert_eq!(rotated.dimensions(), (1, 2));
        // Clockwise: the left pixel ends up on top.
        assert_eq!(rotated.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(rotated.get_pixel(0, 1).0, [0, 0, 255]);
    }

    #[test]
    fn mirror_flips_columns() {
        let mirrored = apply_transform(
            &two_pixel_frame(),
            &AffineTransform::mirror_horizontal(),
            [0; 3],
        );
        assert_eq!(mirrored.dimensions(), (2, 1));
        assert_eq!(mirrored.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(mirrored.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn half_turn_reverses_order() {
        let turned = apply_transform(&two_pixel_frame(), &AffineTransform::rotation(180.0), [0; 3]);
        assert_eq!(turned.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn mean_color_of_solid_region() {
        let frame = solid_frame(8, 8, [10, 20, 30]);
        assert_eq!(mean_color(&frame, 2, 2, 4, 4), Some([10, 20, 30]));
        assert_eq!(mean_color(&frame, 8, 0, 4, 4), None);
    }
}
