// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the box blur filter

use webcam_filters::PipelineError;
use webcam_filters::filters::{BoxBlur, FrameBuffer};

#[test]
fn test_uniform_frame_is_unchanged_for_every_kernel() {
    let original = FrameBuffer::filled(23, 17, [91, 7, 254]);
    for kernel in 1..=200 {
        let mut frame = original.clone();
        BoxBlur::new(kernel).unwrap().apply(&mut frame).unwrap();
        assert_eq!(frame.data(), original.data(), "kernel {}", kernel);
    }
}

#[test]
fn test_kernel_larger_than_frame() {
    let original = FrameBuffer::filled(3, 2, [10, 20, 30]);
    let mut frame = original.clone();
    BoxBlur::new(200).unwrap().apply(&mut frame).unwrap();
    assert_eq!(frame, original);
}

#[test]
fn test_blur_averages_an_edge() {
    // Single row: black | white step
    let mut frame = FrameBuffer::new(4, 1);
    frame.set_pixel(2, 0, [255; 3]);
    frame.set_pixel(3, 0, [255; 3]);
    BoxBlur::new(3).unwrap().apply(&mut frame).unwrap();

    // Neighbours of the edge are mixed, the outermost columns reflect
    assert_eq!(frame.pixel(0, 0), [0; 3]);
    assert_eq!(frame.pixel(1, 0), [85; 3]);
    assert_eq!(frame.pixel(2, 0), [170; 3]);
    assert_eq!(frame.pixel(3, 0), [255; 3]);
}

#[test]
fn test_timestamps_survive_blur() {
    let mut frame = FrameBuffer::filled(4, 4, [1, 2, 3]);
    frame.pts = Some(42);
    frame.duration = Some(33);
    BoxBlur::new(5).unwrap().apply(&mut frame).unwrap();
    assert_eq!((frame.pts, frame.duration), (Some(42), Some(33)));
}

#[test]
fn test_out_of_range_kernel() {
    assert!(matches!(BoxBlur::new(0), Err(PipelineError::InvalidConfig(_))));
    assert!(matches!(BoxBlur::new(201), Err(PipelineError::InvalidConfig(_))));
}
