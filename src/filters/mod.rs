// SPDX-License-Identifier: GPL-3.0-only

//! In-process frame filters
//!
//! These run on RGB888 frames outside GStreamer, on their own threads:
//! - [`box_blur`]: normalized box blur
//! - [`segmentation`]: foreground mask from a segmentation model
//! - [`compositor`]: three-input conditional select
//! - [`branch`]: threads and bounded channels tying them together

pub mod box_blur;
pub mod branch;
pub mod compositor;
pub mod frame;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod segmentation;

pub use box_blur::BoxBlur;
pub use branch::{BranchSpec, FailureSlot, FilterBranch, Splitter};
pub use compositor::{FrameSink, SinkFlow, WhereCompositor};
pub use frame::FrameBuffer;
pub use segmentation::{ProbabilityMap, SegmentationModel, Segmenter, load_model};
