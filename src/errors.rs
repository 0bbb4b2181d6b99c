// SPDX-License-Identifier: MPL-2.0

//! Error types for the filter pipeline
//!
//! Negotiation and graph-build errors are raised before any streaming begins.
//! Everything else aborts a running pipeline and sends it back to `Null`.

use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while negotiating, building or running a filter pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Device could not be opened or did not report usable capabilities
    DeviceUnavailable(String),
    /// No advertised capability survived media-type filtering
    NoMatchingFormat(String),
    /// A required processing stage could not be created or linked
    PipelineBuild(String),
    /// Feature-flag token without a `+`/`-` sign (1-based position)
    MalformedFeatureFlag { position: usize, token: String },
    /// Feature-flag token naming an unknown feature or group (1-based position)
    UnknownFeatureName { position: usize, name: String },
    /// Compositor inputs disagree on geometry, timing or stream length
    BufferGeometryMismatch(String),
    /// Internal failure of an in-process element (blur, segmentation, compositor)
    ElementProcessing { element: String, message: String },
    /// Fatal error reported by the streaming host
    Stream {
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    /// Configuration rejected at construction time
    InvalidConfig(String),
}

impl PipelineError {
    /// Shorthand for an in-process element failure
    pub fn element(element: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::ElementProcessing {
            element: element.into(),
            message: message.into(),
        }
    }

    /// Whether the error was raised before streaming started
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            PipelineError::DeviceUnavailable(_)
                | PipelineError::NoMatchingFormat(_)
                | PipelineError::PipelineBuild(_)
                | PipelineError::MalformedFeatureFlag { .. }
                | PipelineError::UnknownFeatureName { .. }
                | PipelineError::InvalidConfig(_)
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            PipelineError::NoMatchingFormat(msg) => write!(f, "No matching format: {}", msg),
            PipelineError::PipelineBuild(msg) => write!(f, "Failed to build pipeline: {}", msg),
            PipelineError::MalformedFeatureFlag { position, token } => write!(
                f,
                "Malformed feature flag at position {}: '{}' (expected +name or -name)",
                position, token
            ),
            PipelineError::UnknownFeatureName { position, name } => {
                write!(f, "Unknown feature name at position {}: '{}'", position, name)
            }
            PipelineError::BufferGeometryMismatch(msg) => {
                write!(f, "Buffer geometry mismatch: {}", msg)
            }
            PipelineError::ElementProcessing { element, message } => {
                write!(f, "{} failed: {}", element, message)
            }
            PipelineError::Stream {
                source,
                message,
                debug,
            } => {
                match source {
                    Some(source) => write!(f, "Stream error from {}: {}", source, message)?,
                    None => write!(f, "Stream error: {}", message)?,
                }
                if let Some(debug) = debug {
                    write!(f, " ({})", debug)?;
                }
                Ok(())
            }
            PipelineError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<gstreamer::glib::BoolError> for PipelineError {
    fn from(err: gstreamer::glib::BoolError) -> Self {
        PipelineError::PipelineBuild(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for PipelineError {
    fn from(err: gstreamer::glib::Error) -> Self {
        PipelineError::PipelineBuild(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_flag_errors_report_position() {
        let err = PipelineError::UnknownFeatureName {
            position: 2,
            name: "foo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown feature name at position 2: 'foo'"
        );
    }

    #[test]
    fn test_stream_error_includes_debug_detail() {
        let err = PipelineError::Stream {
            source: Some("/GstPipeline:pipeline0/GstV4l2Src:source".to_string()),
            message: "Internal data stream error.".to_string(),
            debug: Some("streaming stopped, reason not-negotiated".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("GstV4l2Src:source"));
        assert!(text.ends_with("(streaming stopped, reason not-negotiated)"));
    }

    #[test]
    fn test_setup_errors_are_classified() {
        assert!(PipelineError::NoMatchingFormat("x".into()).is_setup_error());
        assert!(!PipelineError::BufferGeometryMismatch("x".into()).is_setup_error());
        assert!(!PipelineError::element("BoxBlur", "map failed").is_setup_error());
    }
}
