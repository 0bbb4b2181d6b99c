// SPDX-License-Identifier: GPL-3.0-only

//! Normalized box blur over RGB frames
//!
//! Separable running-sum filter: a horizontal pass accumulates un-normalized
//! row sums, a vertical pass sums those and divides once by `K * K`. A
//! constant frame therefore comes back bit-identical.
//!
//! Borders use reflect-101 (`gfedcb|abcdefgh|gfedcba`); the window for output
//! position `x` spans `x - K/2 ..= x - K/2 + K - 1`.

use super::frame::{BYTES_PER_PIXEL, FrameBuffer};
use crate::constants::blur::MAX_KERNEL_SIZE;
use crate::errors::{PipelineError, PipelineResult};

/// In-place box blur with a fixed kernel size
#[derive(Debug)]
pub struct BoxBlur {
    kernel: usize,
    /// Horizontal sums, reused across frames of equal size
    row_sums: Vec<u32>,
    column_sums: Vec<u32>,
}

impl BoxBlur {
    pub fn new(kernel: u32) -> PipelineResult<Self> {
        if kernel == 0 || kernel > MAX_KERNEL_SIZE {
            return Err(PipelineError::InvalidConfig(format!(
                "blur kernel must be within 1..={}, got {}",
                MAX_KERNEL_SIZE, kernel
            )));
        }
        Ok(Self {
            kernel: kernel as usize,
            row_sums: Vec::new(),
            column_sums: Vec::new(),
        })
    }

    pub fn kernel(&self) -> u32 {
        self.kernel as u32
    }

    /// Blur `frame` in place
    pub fn apply(&mut self, frame: &mut FrameBuffer) -> PipelineResult<()> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        if width == 0 || height == 0 || self.kernel == 1 {
            return Ok(());
        }

        let stride = width * BYTES_PER_PIXEL;
        let k = self.kernel as isize;
        let anchor = k / 2;

        self.row_sums.resize(stride * height, 0);
        let data = frame.data_mut();

        // Horizontal pass
        for y in 0..height {
            let src = &data[y * stride..(y + 1) * stride];
            let dst = &mut self.row_sums[y * stride..(y + 1) * stride];
            for c in 0..BYTES_PER_PIXEL {
                let at = |x: isize| src[reflect_101(x, width) * BYTES_PER_PIXEL + c] as u32;
                let mut sum: u32 = (0..k).map(|i| at(i - anchor)).sum();
                dst[c] = sum;
                for x in 1..width as isize {
                    sum = sum + at(x - anchor + k - 1) - at(x - anchor - 1);
                    dst[x as usize * BYTES_PER_PIXEL + c] = sum;
                }
            }
        }

        // Vertical pass, normalizing once
        let area = (self.kernel * self.kernel) as u32;
        let round = area / 2;
        let rows = &self.row_sums;
        let row = |y: isize| {
            let y = reflect_101(y, height);
            &rows[y * stride..(y + 1) * stride]
        };

        self.column_sums.clear();
        self.column_sums.resize(stride, 0);
        for i in 0..k {
            for (acc, v) in self.column_sums.iter_mut().zip(row(i - anchor)) {
                *acc += v;
            }
        }

        for y in 0..height as isize {
            if y > 0 {
                let entering = row(y - anchor + k - 1);
                let leaving = row(y - anchor - 1);
                for ((acc, add), sub) in self.column_sums.iter_mut().zip(entering).zip(leaving) {
                    *acc = *acc + add - sub;
                }
            }
            let out = &mut data[y as usize * stride..(y as usize + 1) * stride];
            for (dst, acc) in out.iter_mut().zip(&self.column_sums) {
                *dst = ((acc + round) / area) as u8;
            }
        }

        Ok(())
    }
}

/// Map an out-of-range index back inside `0..len` by reflect-101
fn reflect_101(mut p: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    loop {
        if p < 0 {
            p = -p;
        } else if p >= len {
            p = 2 * len - 2 - p;
        } else {
            return p as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(2, 5), 2);
        // Overshoot by more than the length bounces repeatedly
        assert!(reflect_101(-40, 3) < 3);
        assert!(reflect_101(97, 2) < 2);
    }

    #[test]
    fn test_single_row_kernel_three() {
        let mut frame = FrameBuffer::from_data(
            3,
            1,
            vec![0, 0, 0, 30, 30, 30, 60, 60, 60],
        )
        .unwrap();
        let mut blur = BoxBlur::new(3).unwrap();
        blur.apply(&mut frame).unwrap();
        // Rows: [30+0+30, 0+30+60, 30+60+30] / 3, then height 1 reflects onto itself
        assert_eq!(frame.data(), &[20, 20, 20, 30, 30, 30, 40, 40, 40]);
    }

    #[test]
    fn test_kernel_one_is_identity() {
        let data: Vec<u8> = (0..5 * 4 * 3).map(|i| (i * 7 % 256) as u8).collect();
        let mut frame = FrameBuffer::from_data(5, 4, data.clone()).unwrap();
        BoxBlur::new(1).unwrap().apply(&mut frame).unwrap();
        assert_eq!(frame.data(), data.as_slice());
    }

    #[test]
    fn test_channels_are_independent() {
        let mut frame = FrameBuffer::filled(6, 6, [255, 0, 128]);
        frame.set_pixel(0, 0, [0, 0, 128]);
        BoxBlur::new(3).unwrap().apply(&mut frame).unwrap();
        for y in 0..6 {
            for x in 0..6 {
                let [_, g, b] = frame.pixel(x, y);
                assert_eq!((g, b), (0, 128));
            }
        }
        assert!(frame.pixel(0, 0)[0] < 255);
        assert_eq!(frame.pixel(5, 5)[0], 255);
    }

    #[test]
    fn test_kernel_bounds() {
        assert!(BoxBlur::new(0).is_err());
        assert!(BoxBlur::new(201).is_err());
        assert!(BoxBlur::new(200).is_ok());
    }
}
