// SPDX-License-Identifier: GPL-3.0-only

//! Validated pipeline configuration
//!
//! A [`PipelineConfig`] can only be obtained through [`PipelineConfigBuilder::build`],
//! which checks every bound once. The pipeline never re-validates per frame.

use crate::constants::{blur, defaults};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::{DesiredFormat, Framerate};
use crate::media::hwaccel::VaapiFeatures;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which segmentation network to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentationModelKind {
    /// Square 256x256 input, suited to portrait framing
    #[default]
    General,
    /// 144x256 input, faster on wide frames
    Landscape,
}

impl SegmentationModelKind {
    /// Network file name inside the model directory
    pub fn file_name(&self) -> &'static str {
        match self {
            SegmentationModelKind::General => "selfie_segmentation.onnx",
            SegmentationModelKind::Landscape => "selfie_segmentation_landscape.onnx",
        }
    }
}

impl fmt::Display for SegmentationModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationModelKind::General => write!(f, "general"),
            SegmentationModelKind::Landscape => write!(f, "landscape"),
        }
    }
}

impl FromStr for SegmentationModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(SegmentationModelKind::General),
            "landscape" => Ok(SegmentationModelKind::Landscape),
            other => Err(format!(
                "unknown segmentation model '{}' (expected general or landscape)",
                other
            )),
        }
    }
}

/// Hardware acceleration API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwAccelMode {
    #[default]
    Off,
    Vaapi,
}

impl fmt::Display for HwAccelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwAccelMode::Off => write!(f, "off"),
            HwAccelMode::Vaapi => write!(f, "vaapi"),
        }
    }
}

impl FromStr for HwAccelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(HwAccelMode::Off),
            "vaapi" => Ok(HwAccelMode::Vaapi),
            other => Err(format!(
                "unknown hardware acceleration api '{}' (expected off or vaapi)",
                other
            )),
        }
    }
}

/// What to do when a requested accelerated element is not installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwFallbackPolicy {
    /// Log a warning and use the software stage
    #[default]
    Degrade,
    /// Abort the build
    Fail,
}

impl fmt::Display for HwFallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwFallbackPolicy::Degrade => write!(f, "degrade"),
            HwFallbackPolicy::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for HwFallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "degrade" => Ok(HwFallbackPolicy::Degrade),
            "fail" => Ok(HwFallbackPolicy::Fail),
            other => Err(format!(
                "unknown fallback policy '{}' (expected degrade or fail)",
                other
            )),
        }
    }
}

/// Default directory holding segmentation networks
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(defaults::MODEL_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Immutable, validated pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    input_device: String,
    output_device: String,
    desired_format: DesiredFormat,
    background_blur: Option<u32>,
    segmentation_model: SegmentationModelKind,
    segmentation_threshold: f32,
    hw_accel_mode: HwAccelMode,
    hw_accel_features: VaapiFeatures,
    hw_fallback: HwFallbackPolicy,
    model_dir: PathBuf,
    verbose: bool,
}

impl PipelineConfig {
    pub fn builder(
        input_device: impl Into<String>,
        output_device: impl Into<String>,
    ) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(input_device.into(), output_device.into())
    }

    pub fn input_device(&self) -> &str {
        &self.input_device
    }

    pub fn output_device(&self) -> &str {
        &self.output_device
    }

    pub fn desired_format(&self) -> &DesiredFormat {
        &self.desired_format
    }

    /// Blur kernel size when the filtering branch is enabled
    ///
    /// `None` for an absent or zero blur, in which case the branch is not built.
    pub fn blur_kernel(&self) -> Option<u32> {
        self.background_blur.filter(|k| *k > 0)
    }

    pub fn filtering_enabled(&self) -> bool {
        self.blur_kernel().is_some()
    }

    pub fn segmentation_model(&self) -> SegmentationModelKind {
        self.segmentation_model
    }

    pub fn segmentation_threshold(&self) -> f32 {
        self.segmentation_threshold
    }

    pub fn hw_accel_mode(&self) -> HwAccelMode {
        self.hw_accel_mode
    }

    /// Features to accelerate; empty when acceleration is off
    pub fn requested_features(&self) -> VaapiFeatures {
        match self.hw_accel_mode {
            HwAccelMode::Off => VaapiFeatures::empty(),
            HwAccelMode::Vaapi => self.hw_accel_features,
        }
    }

    pub fn hw_fallback(&self) -> HwFallbackPolicy {
        self.hw_fallback
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Path of the selected segmentation network
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(self.segmentation_model.file_name())
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

/// Builder for [`PipelineConfig`]
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    fn new(input_device: String, output_device: String) -> Self {
        Self {
            config: PipelineConfig {
                input_device,
                output_device,
                desired_format: DesiredFormat::default(),
                background_blur: None,
                segmentation_model: SegmentationModelKind::default(),
                segmentation_threshold: defaults::SEGMENTATION_THRESHOLD,
                hw_accel_mode: HwAccelMode::default(),
                hw_accel_features: VaapiFeatures::all(),
                hw_fallback: HwFallbackPolicy::default(),
                model_dir: default_model_dir(),
                verbose: false,
            },
        }
    }

    pub fn desired_format(mut self, desired: DesiredFormat) -> Self {
        self.config.desired_format = desired;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.config.desired_format.width = width;
        self.config.desired_format.height = height;
        self
    }

    pub fn framerate(mut self, framerate: Framerate) -> Self {
        self.config.desired_format.framerate = framerate;
        self
    }

    pub fn media_type(mut self, media_type: Option<String>) -> Self {
        self.config.desired_format.media_type = media_type;
        self
    }

    pub fn background_blur(mut self, kernel: Option<u32>) -> Self {
        self.config.background_blur = kernel;
        self
    }

    pub fn segmentation_model(mut self, model: SegmentationModelKind) -> Self {
        self.config.segmentation_model = model;
        self
    }

    pub fn segmentation_threshold(mut self, threshold: f32) -> Self {
        self.config.segmentation_threshold = threshold;
        self
    }

    pub fn hw_accel(mut self, mode: HwAccelMode, features: VaapiFeatures) -> Self {
        self.config.hw_accel_mode = mode;
        self.config.hw_accel_features = features;
        self
    }

    pub fn hw_fallback(mut self, policy: HwFallbackPolicy) -> Self {
        self.config.hw_fallback = policy;
        self
    }

    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Validate every bound and freeze the configuration
    pub fn build(self) -> PipelineResult<PipelineConfig> {
        let config = self.config;

        if config.input_device.trim().is_empty() {
            return Err(invalid("input device must not be empty"));
        }
        if config.output_device.trim().is_empty() {
            return Err(invalid("output device must not be empty"));
        }

        let desired = &config.desired_format;
        if desired.width == 0 || desired.height == 0 {
            return Err(invalid(format!(
                "resolution must be positive, got {}x{}",
                desired.width, desired.height
            )));
        }
        if desired.width > i32::MAX as u32 || desired.height > i32::MAX as u32 {
            return Err(invalid("resolution exceeds the supported range"));
        }
        if desired.framerate.num == 0 || desired.framerate.denom == 0 {
            return Err(invalid(format!(
                "framerate must be positive, got {}",
                desired.framerate
            )));
        }
        if desired.framerate.num > i32::MAX as u32 || desired.framerate.denom > i32::MAX as u32 {
            return Err(invalid("framerate exceeds the supported range"));
        }
        if let Some(media_type) = &desired.media_type
            && media_type.trim().is_empty()
        {
            return Err(invalid("media type filter must not be empty"));
        }

        if let Some(kernel) = config.background_blur
            && kernel > blur::MAX_KERNEL_SIZE
        {
            return Err(invalid(format!(
                "background blur must be within 0..={}, got {}",
                blur::MAX_KERNEL_SIZE,
                kernel
            )));
        }

        let threshold = config.segmentation_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(format!(
                "segmentation threshold must be within 0..=1, got {}",
                threshold
            )));
        }

        Ok(config)
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfig(message.into())
}
