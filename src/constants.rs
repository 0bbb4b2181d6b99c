// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Defaults applied when the command line leaves a value unset
pub mod defaults {
    /// Desired capture width
    pub const WIDTH: u32 = 1280;

    /// Desired capture height
    pub const HEIGHT: u32 = 720;

    /// Desired capture framerate as numerator/denominator
    pub const FRAMERATE: (u32, u32) = (30, 1);

    /// Foreground probability threshold
    pub const SEGMENTATION_THRESHOLD: f32 = 0.5;

    /// Hardware acceleration feature flags when acceleration is enabled
    pub const VAAPI_FEATURES: &str = "+all";

    /// Directory name under the user data dir holding segmentation networks
    pub const MODEL_DIR_NAME: &str = "webcam-filters/models";
}

/// Blur kernel bounds
pub mod blur {
    /// Largest accepted kernel size
    pub const MAX_KERNEL_SIZE: u32 = 200;
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Pixel format carried between the input converter and the output converter
    pub const PROCESSING_FORMAT: &str = "RGB";

    /// Pixel format written to the loopback sink
    pub const OUTPUT_FORMAT: &str = "YUY2";

    /// Sink throttle time in nanoseconds
    pub const SINK_THROTTLE_TIME_NS: u64 = 10;

    /// Frames the appsrc may hold before push_buffer blocks
    pub const APPSRC_MAX_FRAMES: u64 = 2;

    /// Depth of the in-process queue ahead of segmentation and blur
    pub const BRANCH_QUEUE_DEPTH: usize = 2;

    /// Slots per compositor input (single-slot rendezvous)
    pub const COMPOSITOR_SLOT_DEPTH: usize = 1;

    /// Get number of threads for videoconvert based on available CPU threads
    pub fn videoconvert_threads() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4)
    }
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Upper bound for a single pipeline state step
    pub const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Timeout while probing a device for its capabilities
    pub const CAPS_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

    /// Bus poll interval; bounds how long an interrupt waits to be noticed
    pub const BUS_POLL_INTERVAL: Duration = Duration::from_millis(100);
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
