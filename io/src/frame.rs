//! Conversions between `image` buffers and patches.
//!
//! Pixel intensities map to [0, 1] floats; color frames become
//! three-channel patches in channel-major order.

use anyboost_core::Patch;
use image::{GrayImage, RgbImage};

/// Convert a grayscale frame into a single-channel patch.
pub fn patch_from_gray(img: &GrayImage, label: i8) -> Patch {
    let mut patch = Patch::new(label, img.width() as usize, img.height() as usize, 1);
    for (x, y, pixel) in img.enumerate_pixels() {
        patch.set_value(x as usize, y as usize, 0, pixel[0] as f32 / 255.0);
    }
    patch
}

/// Convert a color frame into a three-channel patch.
pub fn patch_from_rgb(img: &RgbImage, label: i8) -> Patch {
    let mut patch = Patch::new(label, img.width() as usize, img.height() as usize, 3);
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            patch.set_value(x as usize, y as usize, c, pixel[c] as f32 / 255.0);
        }
    }
    patch
}

/// Render channel 0 of a patch back into a grayscale image, clamping to
/// 8 bits.
pub fn gray_from_patch(patch: &Patch) -> GrayImage {
    GrayImage::from_fn(patch.width() as u32, patch.height() as u32, |x, y| {
        let v = patch.value(x as usize, y as usize, 0);
        image::Luma([(255.0 * v).clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_round_trip() {
        let mut img = GrayImage::new(3, 2);
        img.put_pixel(1, 1, image::Luma([255]));
        img.put_pixel(2, 0, image::Luma([51]));

        let patch = patch_from_gray(&img, 1);
        assert_eq!(patch.geometry().channels, 1);
        assert_eq!(patch.value(1, 1, 0), 1.0);
        assert!((patch.value(2, 0, 0) - 0.2).abs() < 1e-6);

        let back = gray_from_patch(&patch);
        assert_eq!(back, img);
    }

    #[test]
    fn rgb_channels_are_channel_major() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 0, 255]));

        let patch = patch_from_rgb(&img, -1);
        assert_eq!(patch.value(0, 0, 0), 1.0);
        assert_eq!(patch.value(0, 0, 2), 0.0);
        assert_eq!(patch.value(1, 0, 2), 1.0);
    }
}
