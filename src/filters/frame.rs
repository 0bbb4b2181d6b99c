// SPDX-License-Identifier: GPL-3.0-only

//! Packed RGB frame flowing through the filter branch

use crate::errors::{PipelineError, PipelineResult};

/// Bytes per RGB888 pixel
pub const BYTES_PER_PIXEL: usize = 3;

/// Mask value for foreground pixels (all three channels)
pub const MASK_FOREGROUND: u8 = 0xFF;
/// Mask value for background pixels (all three channels)
pub const MASK_BACKGROUND: u8 = 0x00;

/// RGB888 frame, row-major with no row padding
///
/// Timestamps are in nanoseconds. A frame has exactly one owner at a time;
/// it moves between workers by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub duration: Option<u64>,
}

impl FrameBuffer {
    /// Black frame of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::byte_len(width, height)],
            pts: None,
            dts: None,
            duration: None,
        }
    }

    /// Frame with every pixel set to `rgb`
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut frame = Self::new(width, height);
        for pixel in frame.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&rgb);
        }
        frame
    }

    /// Wrap existing pixel data, which must be exactly `width * height * 3` bytes
    pub fn from_data(width: u32, height: u32, data: Vec<u8>) -> PipelineResult<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(PipelineError::BufferGeometryMismatch(format!(
                "{}x{} RGB frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            pts: None,
            dts: None,
            duration: None,
        })
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        (x < self.width && y < self.height).then(|| self.pixel(x, y))
    }

    /// RGB triple at `(x, y)`
    ///
    /// # Panics
    ///
    /// Panics if `x >= width` or `y >= height`. Use [`Self::get_pixel`] for a
    /// checked lookup.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        assert!(
            x < self.width && y < self.height,
            "pixel ({}, {}) outside {}x{} frame",
            x,
            y,
            self.width,
            self.height
        );
        let offset = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }

    /// # Panics
    ///
    /// Panics if `x >= width` or `y >= height`.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({}, {}) outside {}x{} frame",
            x,
            y,
            self.width,
            self.height
        );
        let offset = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&rgb);
    }

    pub fn copy_timestamps_from(&mut self, other: &FrameBuffer) {
        self.pts = other.pts;
        self.dts = other.dts;
        self.duration = other.duration;
    }

    /// Overwrite every pixel with the mask encoding of `foreground`
    ///
    /// `foreground` yields one value per pixel in row-major order; missing
    /// trailing values leave pixels untouched.
    pub fn write_mask(&mut self, foreground: impl IntoIterator<Item = bool>) {
        for (pixel, is_fg) in self
            .data
            .chunks_exact_mut(BYTES_PER_PIXEL)
            .zip(foreground)
        {
            let value = if is_fg {
                MASK_FOREGROUND
            } else {
                MASK_BACKGROUND
            };
            pixel.fill(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_pixel_is_checked() {
        let mut frame = FrameBuffer::new(3, 2);
        frame.set_pixel(2, 1, [7, 8, 9]);
        assert_eq!(frame.get_pixel(2, 1), Some([7, 8, 9]));
        assert_eq!(frame.get_pixel(3, 0), None);
        assert_eq!(frame.get_pixel(0, 2), None);
    }

    #[test]
    #[should_panic(expected = "outside 3x2 frame")]
    fn test_pixel_past_row_end_panics() {
        // (3, 0) would alias (0, 1) without the bounds check
        FrameBuffer::new(3, 2).pixel(3, 0);
    }

    #[test]
    #[should_panic(expected = "outside 3x2 frame")]
    fn test_set_pixel_below_frame_panics() {
        FrameBuffer::new(3, 2).set_pixel(0, 2, [1, 2, 3]);
    }

    #[test]
    fn test_from_data_checks_length() {
        assert!(FrameBuffer::from_data(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            FrameBuffer::from_data(2, 2, vec![0; 11]),
            Err(PipelineError::BufferGeometryMismatch(_))
        ));
    }

    #[test]
    fn test_pixel_addressing() {
        let mut frame = FrameBuffer::new(4, 3);
        frame.set_pixel(3, 2, [1, 2, 3]);
        assert_eq!(frame.pixel(3, 2), [1, 2, 3]);
        assert_eq!(&frame.data()[frame.data().len() - 3..], &[1, 2, 3]);
    }

    #[test]
    fn test_write_mask_replicates_channels() {
        let mut frame = FrameBuffer::filled(2, 1, [10, 20, 30]);
        frame.write_mask([true, false]);
        assert_eq!(frame.data(), &[0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00]);
    }
}
