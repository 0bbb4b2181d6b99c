// SPDX-License-Identifier: GPL-3.0-only

//! MediaPipe selfie segmentation through ONNX Runtime
//!
//! Both networks take NHWC float input normalized to `[0, 1]` and return a
//! single-channel foreground probability map at input resolution:
//!
//! | model     | input            |
//! |-----------|------------------|
//! | general   | 1 x 256 x 256 x 3 |
//! | landscape | 1 x 144 x 256 x 3 |

use super::frame::FrameBuffer;
use super::segmentation::{ProbabilityMap, SegmentationModel};
use crate::config::SegmentationModelKind;
use crate::errors::{PipelineError, PipelineResult};
use image::{ImageBuffer, Rgb, imageops};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use std::path::Path;
use tracing::info;

pub struct OnnxSelfieSegmentation {
    session: Session,
    input_width: u32,
    input_height: u32,
}

impl OnnxSelfieSegmentation {
    pub fn load(kind: SegmentationModelKind, path: &Path) -> PipelineResult<Self> {
        if !path.is_file() {
            return Err(PipelineError::PipelineBuild(format!(
                "segmentation model not found at {}",
                path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| {
                PipelineError::PipelineBuild(format!(
                    "failed to load segmentation model {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let (input_width, input_height) = match kind {
            SegmentationModelKind::General => (256, 256),
            SegmentationModelKind::Landscape => (256, 144),
        };
        info!(
            model = %kind,
            path = %path.display(),
            input_width,
            input_height,
            "Loaded segmentation model"
        );

        Ok(Self {
            session,
            input_width,
            input_height,
        })
    }

    fn input_tensor(&self, frame: &FrameBuffer) -> PipelineResult<Tensor<f32>> {
        let source: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width(), frame.height(), frame.data())
                .ok_or_else(|| inference_error("frame buffer smaller than its geometry"))?;
        let scaled = imageops::resize(
            &source,
            self.input_width,
            self.input_height,
            imageops::FilterType::Triangle,
        );
        let normalized: Vec<f32> = scaled
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();

        let shape = [
            1usize,
            self.input_height as usize,
            self.input_width as usize,
            3,
        ];
        Tensor::from_array((shape, normalized)).map_err(inference_error)
    }
}

impl SegmentationModel for OnnxSelfieSegmentation {
    fn segment(&mut self, frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
        let input = self.input_tensor(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(inference_error)?;
        let (_shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        let values = values.iter().map(|p| p.clamp(0.0, 1.0)).collect();
        ProbabilityMap::new(self.input_width, self.input_height, values)
    }
}

fn inference_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::element("Segmentation", e.to_string())
}
