// SPDX-License-Identifier: GPL-3.0-only

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use webcam_filters::constants::{app_info, defaults};
use webcam_filters::{
    Framerate, HwAccelMode, HwFallbackPolicy, PipelineConfig, PipelineResult, RunOutcome,
    SegmentationModelKind, VaapiFeatures,
};

mod cli;

/// Add video filters to your webcam
#[derive(Parser, Debug)]
#[command(name = "webcam-filters")]
#[command(version = app_info::version())]
struct Cli {
    /// Input device (e.g. real webcam at /dev/video0)
    #[arg(long, required_unless_present = "list_dev_caps")]
    input_dev: Option<String>,

    /// Preferred width
    #[arg(long, default_value_t = defaults::WIDTH)]
    input_width: u32,

    /// Preferred height
    #[arg(long, default_value_t = defaults::HEIGHT)]
    input_height: u32,

    /// Preferred framerate as a fraction (e.g. 30/1)
    #[arg(long, default_value = "30/1")]
    input_framerate: Framerate,

    /// Only accept this media type (e.g. image/jpeg or video/x-raw)
    #[arg(long)]
    input_media_type: Option<String>,

    /// Output device (e.g. virtual webcam at /dev/video3)
    #[arg(long, required_unless_present = "list_dev_caps")]
    output_dev: Option<String>,

    /// Background blur intensity (0 disables it)
    ///
    /// Blurring needs person segmentation, which is only available when
    /// built with `--features onnx`.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=200))]
    background_blur: Option<u32>,

    /// Selfie segmentation network (general or landscape)
    #[arg(long, default_value_t = SegmentationModelKind::General)]
    selfie_segmentation_model: SegmentationModelKind,

    /// Selfie segmentation threshold in [0, 1]
    #[arg(long, default_value_t = defaults::SEGMENTATION_THRESHOLD)]
    selfie_segmentation_threshold: f32,

    /// Hardware acceleration API (off or vaapi)
    #[arg(long, default_value_t = HwAccelMode::Off)]
    hw_accel_api: HwAccelMode,

    /// Comma separated VA-API features, each prefixed with + or -
    #[arg(long, default_value = defaults::VAAPI_FEATURES, allow_hyphen_values = true)]
    vaapi_features: VaapiFeatures,

    /// What to do when a requested accelerated element is missing (degrade or fail)
    #[arg(long, default_value_t = HwFallbackPolicy::Degrade)]
    hw_accel_fallback: HwFallbackPolicy,

    /// Directory holding the segmentation models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// List device capabilities and exit
    #[arg(long, value_name = "DEVICE")]
    list_dev_caps: Option<String>,
}

impl Cli {
    fn into_config(self) -> PipelineResult<PipelineConfig> {
        let mut builder = PipelineConfig::builder(
            self.input_dev.unwrap_or_default(),
            self.output_dev.unwrap_or_default(),
        )
        .resolution(self.input_width, self.input_height)
        .framerate(self.input_framerate)
        .media_type(self.input_media_type)
        .background_blur(self.background_blur)
        .segmentation_model(self.selfie_segmentation_model)
        .segmentation_threshold(self.selfie_segmentation_threshold)
        .hw_accel(self.hw_accel_api, self.vaapi_features)
        .hw_fallback(self.hw_accel_fallback)
        .verbose(self.verbose);
        if let Some(dir) = self.model_dir {
            builder = builder.model_dir(dir);
        }
        builder.build()
    }
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins, e.g. RUST_LOG=webcam_filters=trace
    let default_filter = if verbose {
        "webcam_filters=debug,info"
    } else {
        "webcam_filters=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(verbose)
        .with_level(true)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!(?cli, "Parsed command line");

    if let Some(device) = cli.list_dev_caps.as_deref() {
        return match cli::list_dev_caps(device) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(&e),
        };
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        return fail(&e);
    }

    match webcam_filters::run(&config, interrupt) {
        Ok(RunOutcome::EndOfStream) => {
            info!("Stream ended");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Interrupted) => {
            info!("Stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.is_setup_error() {
                debug!("Pipeline was not started");
            }
            fail(&e)
        }
    }
}

fn fail(error: &dyn std::fmt::Display) -> ExitCode {
    eprintln!("Error: {}", error);
    ExitCode::FAILURE
}
