//! Decoded RGB frames.

use image::RgbImage;

/// One decoded frame in packed RGB8 layout.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Zero-based position in the source
    pub index: u64,
    /// Presentation time in seconds
    pub timestamp_seconds: f64,
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, timestamp_seconds: f64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            index,
            timestamp_seconds,
            width,
            height,
            pixels,
        }
    }

    pub fn from_image(index: u64, timestamp_seconds: f64, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(index, timestamp_seconds, width, height, image.into_raw())
    }

    /// Solid-color frame.
    pub fn filled(index: u64, timestamp_seconds: f64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(Self::byte_len(width, height))
            .collect();
        Self::new(index, timestamp_seconds, width, height, pixels)
    }

    /// Bytes needed for an RGB8 frame of the given size.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy into an [`RgbImage`]; `None` if the buffer size does not match.
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// Largest dimensions that fit `max` while keeping aspect ratio.
///
/// Results are rounded down to even numbers so they can feed yuv420p encoders.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    if width <= max_width && height <= max_height {
        return ((width & !1).max(2), (height & !1).max(2));
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let w = ((width as f64 * scale).floor() as u32).max(2) & !1;
    let h = ((height as f64 * scale).floor() as u32).max(2) & !1;
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_frame_round_trips_to_image() {
        let frame = Frame::filled(0, 0.0, 4, 2, [10, 20, 30]);
        assert_eq!(frame.pixels.len(), Frame::byte_len(4, 2));
        let image = frame.to_image().unwrap();
        assert_eq!(image.get_pixel(3, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_mismatched_buffer() {
        let frame = Frame::new(0, 0.0, 4, 4, vec![0; 5]);
        assert!(frame.to_image().is_none());
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(3840, 2160, 1920, 1080), (1920, 1080));
        assert_eq!(fit_within(1000, 4000, 1920, 1080), (270, 1080));
        assert_eq!(fit_within(641, 481, 1920, 1080), (640, 480));
        assert_eq!(fit_within(0, 10, 1920, 1080), (0, 10));
    }
}
