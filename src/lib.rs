// SPDX-License-Identifier: GPL-3.0-only

//! Webcam Filters - background blur for V4L2 cameras
//!
//! Reads frames from a V4L2 capture device, optionally blurs everything but
//! the person in front of the camera, and writes the result to a V4L2
//! loopback device that other applications can open as a camera.
//!
//! # Architecture
//!
//! - [`config`]: Validated pipeline configuration
//! - [`media`]: Capability query, format negotiation and VA-API discovery
//! - [`filters`]: Box blur, segmentation and the conditional compositor
//! - [`pipelines`]: Graph building, GStreamer assembly and the runner
//!
//! # Example
//!
//! ```ignore
//! let config = PipelineConfig::builder("/dev/video0", "/dev/video10")
//!     .background_blur(Some(75))
//!     .build()?;
//! let outcome = webcam_filters::run(&config, Arc::new(AtomicBool::new(false)))?;
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod filters;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use config::{HwAccelMode, HwFallbackPolicy, PipelineConfig, SegmentationModelKind};
pub use errors::{PipelineError, PipelineResult};
pub use media::{DesiredFormat, FixedFormat, Framerate, VaapiFeatures};
pub use pipelines::{RunOutcome, run};
