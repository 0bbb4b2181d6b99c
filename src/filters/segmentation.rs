// SPDX-License-Identifier: GPL-3.0-only

//! Foreground segmentation into mask frames
//!
//! The model is a black box: RGB frame in, per-pixel foreground probability
//! out. [`Segmenter`] thresholds that map (inclusive) and overwrites the frame
//! with `0xFF`/`0x00` in all three channels, so the mask travels as an
//! ordinary RGB frame.

use super::frame::FrameBuffer;
use crate::config::SegmentationModelKind;
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::{PipelineError, PipelineResult};
use image::{ImageBuffer, Luma, imageops};
use std::path::Path;
use tracing::debug;

/// Per-pixel foreground probabilities in `[0, 1]`, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ProbabilityMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> PipelineResult<Self> {
        if values.len() != width as usize * height as usize {
            return Err(PipelineError::element(
                "Segmentation",
                format!(
                    "probability map of {}x{} needs {} values, got {}",
                    width,
                    height,
                    width as usize * height as usize,
                    values.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Map with the same probability everywhere
    pub fn uniform(width: u32, height: u32, probability: f32) -> Self {
        Self {
            width,
            height,
            values: vec![probability; width as usize * height as usize],
        }
    }

    pub fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Bilinear resample to a new geometry
    pub fn resized(&self, width: u32, height: u32) -> PipelineResult<Self> {
        let source: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(self.width, self.height, self.values.clone()).ok_or_else(
                || PipelineError::element("Segmentation", "probability map buffer too small"),
            )?;
        let scaled = imageops::resize(&source, width, height, imageops::FilterType::Triangle);
        Ok(Self {
            width,
            height,
            values: scaled.into_raw(),
        })
    }
}

/// Foreground probability model
///
/// `reset` clears any temporal state; it is called after every frame.
pub trait SegmentationModel: Send {
    fn segment(&mut self, frame: &FrameBuffer) -> PipelineResult<ProbabilityMap>;

    fn reset(&mut self) {}
}

/// Load the network for `kind` from `path`
///
/// Model creation is expensive and happens once per pipeline.
#[cfg(feature = "onnx")]
pub fn load_model(
    kind: SegmentationModelKind,
    path: &Path,
) -> PipelineResult<Box<dyn SegmentationModel>> {
    let model = super::onnx::OnnxSelfieSegmentation::load(kind, path)?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "onnx"))]
pub fn load_model(
    kind: SegmentationModelKind,
    path: &Path,
) -> PipelineResult<Box<dyn SegmentationModel>> {
    Err(PipelineError::PipelineBuild(format!(
        "cannot load {} segmentation model {}: built without the `onnx` feature",
        kind,
        path.display()
    )))
}

/// Segmentation element: frame in, mask frame out (in place)
pub struct Segmenter {
    model: Box<dyn SegmentationModel>,
    threshold: f32,
    frames: u64,
}

impl Segmenter {
    pub fn new(model: Box<dyn SegmentationModel>, threshold: f32) -> Self {
        Self {
            model,
            threshold,
            frames: 0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Replace `frame` with its foreground mask
    pub fn process(&mut self, frame: &mut FrameBuffer) -> PipelineResult<()> {
        let result = self.model.segment(frame);
        // No smoothing may carry into the next frame, even after a failure
        self.model.reset();
        let mut map = result?;

        if map.geometry() != frame.geometry() {
            map = map.resized(frame.width(), frame.height())?;
        }

        let threshold = self.threshold;
        frame.write_mask(map.values().iter().map(|p| *p >= threshold));

        self.frames += 1;
        if self.frames % FRAME_LOG_INTERVAL == 0 {
            let foreground = map.values().iter().filter(|p| **p >= threshold).count();
            debug!(
                frame = self.frames,
                foreground_ratio = foreground as f64 / map.values().len().max(1) as f64,
                "Segmented frame"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("threshold", &self.threshold)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Left half foreground, right half background, at half resolution
    struct HalfFrameModel {
        resets: Arc<AtomicUsize>,
    }

    impl SegmentationModel for HalfFrameModel {
        fn segment(&mut self, frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
            let (w, h) = (frame.width() / 2, frame.height() / 2);
            let values = (0..h)
                .flat_map(|_| (0..w).map(move |x| if x < w / 2 { 1.0 } else { 0.0 }))
                .collect();
            ProbabilityMap::new(w, h, values)
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingModel;

    impl SegmentationModel for FailingModel {
        fn segment(&mut self, _frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
            Err(PipelineError::element("Segmentation", "inference failed"))
        }
    }

    #[test]
    fn test_map_is_resampled_to_frame_geometry() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut segmenter = Segmenter::new(
            Box::new(HalfFrameModel {
                resets: resets.clone(),
            }),
            0.5,
        );
        let mut frame = FrameBuffer::filled(16, 8, [40, 80, 120]);
        segmenter.process(&mut frame).unwrap();

        assert_eq!(frame.pixel(0, 0), [0xFF; 3]);
        assert_eq!(frame.pixel(15, 7), [0x00; 3]);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_model_error_propagates() {
        let mut segmenter = Segmenter::new(Box::new(FailingModel), 0.5);
        let mut frame = FrameBuffer::new(4, 4);
        assert!(matches!(
            segmenter.process(&mut frame),
            Err(PipelineError::ElementProcessing { .. })
        ));
    }

    #[test]
    fn test_probability_map_length_is_checked() {
        assert!(ProbabilityMap::new(2, 2, vec![0.0; 3]).is_err());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_load_without_runtime_fails_at_build() {
        let result = load_model(
            SegmentationModelKind::General,
            Path::new("/nonexistent/selfie_segmentation.onnx"),
        );
        assert!(matches!(result, Err(PipelineError::PipelineBuild(_))));
    }
}
