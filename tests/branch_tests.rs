// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end tests of the in-process filter branch with a fake model

use std::sync::{Arc, Mutex};
use webcam_filters::filters::frame::MASK_FOREGROUND;
use webcam_filters::filters::{
    BoxBlur, BranchSpec, FailureSlot, FilterBranch, FrameBuffer, FrameSink, ProbabilityMap,
    SegmentationModel, Segmenter, SinkFlow, WhereCompositor,
};
use webcam_filters::{PipelineError, PipelineResult};

/// Foreground is the left half of the frame
struct LeftHalf;

impl SegmentationModel for LeftHalf {
    fn segment(&mut self, frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
        let (w, h) = frame.geometry();
        let values = (0..h)
            .flat_map(|_| (0..w).map(move |x| if x < w / 2 { 0.9 } else { 0.1 }))
            .collect();
        ProbabilityMap::new(w, h, values)
    }
}

struct Broken;

impl SegmentationModel for Broken {
    fn segment(&mut self, _frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
        Err(PipelineError::element("Segmentation", "tensor shape mismatch"))
    }
}

#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Collected>>);

#[derive(Default)]
struct Collected {
    frames: Vec<FrameBuffer>,
    ended: bool,
}

impl FrameSink for Collector {
    fn push_frame(&mut self, frame: &FrameBuffer) -> PipelineResult<SinkFlow> {
        self.0.lock().unwrap().frames.push(frame.clone());
        Ok(SinkFlow::Continue)
    }

    fn end_of_stream(&mut self) -> PipelineResult<()> {
        self.0.lock().unwrap().ended = true;
        Ok(())
    }
}

fn textured(width: u32, height: u32, seed: u64) -> FrameBuffer {
    let data = (0..FrameBuffer::byte_len(width, height))
        .map(|i| ((i as u64 * 31 + seed * 17) % 251) as u8)
        .collect();
    let mut frame = FrameBuffer::from_data(width, height, data).unwrap();
    frame.pts = Some(seed * 33_333_333);
    frame
}

fn spec(model: Box<dyn SegmentationModel>, sink: Collector, w: u32, h: u32) -> BranchSpec {
    BranchSpec {
        segmenter: Segmenter::new(model, 0.5),
        blur: BoxBlur::new(5).unwrap(),
        compositor: WhereCompositor::new(w, h).with_timestamp_tolerance(33_333_333),
        sink: Box::new(sink),
        queue_depth: 2,
    }
}

#[test]
fn test_branch_keeps_foreground_and_blurs_background() {
    let (w, h) = (16, 8);
    let sink = Collector::default();
    let (mut branch, splitter) =
        FilterBranch::spawn(spec(Box::new(LeftHalf), sink.clone(), w, h), FailureSlot::new(|_| {}))
            .unwrap();

    let inputs: Vec<FrameBuffer> = (0..6).map(|i| textured(w, h, i)).collect();
    for frame in &inputs {
        assert_eq!(splitter.push(frame.clone()), SinkFlow::Continue);
    }
    drop(splitter);
    branch.join();
    assert!(branch.take_failure().is_none());

    let collected = sink.0.lock().unwrap();
    assert!(collected.ended);
    assert_eq!(collected.frames.len(), inputs.len());

    let mut blur = BoxBlur::new(5).unwrap();
    for (input, output) in inputs.iter().zip(&collected.frames) {
        let mut blurred = input.clone();
        blur.apply(&mut blurred).unwrap();
        assert_eq!(output.pts, input.pts);
        for y in 0..h {
            for x in 0..w {
                let expected = if x < w / 2 {
                    input.pixel(x, y)
                } else {
                    blurred.pixel(x, y)
                };
                assert_eq!(output.pixel(x, y), expected, "pixel ({}, {})", x, y);
            }
        }
    }
}

#[test]
fn test_model_failure_is_recorded_and_notified() {
    let notified = Arc::new(Mutex::new(Vec::new()));
    let log = notified.clone();
    let failure = FailureSlot::new(move |e: &PipelineError| log.lock().unwrap().push(e.clone()));

    let sink = Collector::default();
    let (mut branch, splitter) =
        FilterBranch::spawn(spec(Box::new(Broken), sink.clone(), 4, 4), failure).unwrap();

    splitter.push(textured(4, 4, 0));
    drop(splitter);
    branch.join();

    let expected = PipelineError::element("Segmentation", "tensor shape mismatch");
    assert_eq!(*notified.lock().unwrap(), vec![expected.clone()]);
    assert_eq!(branch.take_failure(), Some(expected));
    assert!(sink.0.lock().unwrap().frames.is_empty());
}

#[test]
fn test_wrong_geometry_fails_in_compositor() {
    let sink = Collector::default();
    let (mut branch, splitter) = FilterBranch::spawn(
        spec(Box::new(LeftHalf), sink.clone(), 8, 8),
        FailureSlot::new(|_| {}),
    )
    .unwrap();

    splitter.push(textured(6, 6, 0));
    drop(splitter);
    branch.join();

    assert!(matches!(
        branch.take_failure(),
        Some(PipelineError::BufferGeometryMismatch(_))
    ));
    let collected = sink.0.lock().unwrap();
    assert!(collected.frames.is_empty());
    assert!(!collected.ended);
}

#[test]
fn test_mask_threshold_is_inclusive() {
    struct Exactly(f32);
    impl SegmentationModel for Exactly {
        fn segment(&mut self, frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
            Ok(ProbabilityMap::uniform(frame.width(), frame.height(), self.0))
        }
    }

    let threshold = 0.5f32;
    let mut at = Segmenter::new(Box::new(Exactly(threshold)), threshold);
    let mut frame = FrameBuffer::filled(2, 2, [9, 9, 9]);
    at.process(&mut frame).unwrap();
    assert_eq!(frame.pixel(0, 0), [MASK_FOREGROUND; 3]);

    let below = f32::from_bits(threshold.to_bits() - 1);
    let mut under = Segmenter::new(Box::new(Exactly(below)), threshold);
    let mut frame = FrameBuffer::filled(2, 2, [9, 9, 9]);
    under.process(&mut frame).unwrap();
    assert_eq!(frame.pixel(0, 0), [0; 3]);
}
