// SPDX-License-Identifier: MPL-2.0

//! Hardware acceleration features and VA-API element detection
//!
//! Acceleration is requested per feature with a small flag language:
//!
//! ```text
//! +all,-decode-h264      every feature except H.264 decoding
//! +decode,-convert       all decoders, no converters
//! ```
//!
//! Tokens apply left to right; `+` unions, `-` removes.

use crate::errors::{PipelineError, PipelineResult};
use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

bitflags! {
    /// Individually toggleable acceleration features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VaapiFeatures: u16 {
        const DECODE_JPEG = 1 << 0;
        const DECODE_H264 = 1 << 1;
        const DECODE_H265 = 1 << 2;
        const DECODE_VP8 = 1 << 3;
        const DECODE_VP9 = 1 << 4;
        const DECODE_MPEG2 = 1 << 5;
        const CONVERT_INPUT = 1 << 6;
        const CONVERT_OUTPUT = 1 << 7;

        const DECODE = Self::DECODE_JPEG.bits()
            | Self::DECODE_H264.bits()
            | Self::DECODE_H265.bits()
            | Self::DECODE_VP8.bits()
            | Self::DECODE_VP9.bits()
            | Self::DECODE_MPEG2.bits();
        const CONVERT = Self::CONVERT_INPUT.bits() | Self::CONVERT_OUTPUT.bits();
    }
}

/// Flag names, groups included, resolved during parsing
const FEATURE_NAMES: &[(&str, VaapiFeatures)] = &[
    ("decode-jpeg", VaapiFeatures::DECODE_JPEG),
    ("decode-h264", VaapiFeatures::DECODE_H264),
    ("decode-h265", VaapiFeatures::DECODE_H265),
    ("decode-vp8", VaapiFeatures::DECODE_VP8),
    ("decode-vp9", VaapiFeatures::DECODE_VP9),
    ("decode-mpeg2", VaapiFeatures::DECODE_MPEG2),
    ("convert-input", VaapiFeatures::CONVERT_INPUT),
    ("convert-output", VaapiFeatures::CONVERT_OUTPUT),
    ("decode", VaapiFeatures::DECODE),
    ("convert", VaapiFeatures::CONVERT),
    ("all", VaapiFeatures::all()),
];

impl VaapiFeatures {
    /// Look up a feature or group by its flag name
    pub fn from_flag_name(name: &str) -> Option<Self> {
        FEATURE_NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, features)| *features)
    }

    /// Flag name of a single feature bit
    pub fn flag_name(self) -> Option<&'static str> {
        FEATURE_NAMES
            .iter()
            .find(|(_, features)| *features == self)
            .map(|(name, _)| *name)
    }

    /// Decode bit matching a capture media type; raw video has none
    pub fn decode_feature_for(media_type: &str) -> Option<Self> {
        match media_type {
            "image/jpeg" => Some(VaapiFeatures::DECODE_JPEG),
            "video/x-h264" => Some(VaapiFeatures::DECODE_H264),
            "video/x-h265" => Some(VaapiFeatures::DECODE_H265),
            "video/x-vp8" => Some(VaapiFeatures::DECODE_VP8),
            "video/x-vp9" => Some(VaapiFeatures::DECODE_VP9),
            "video/mpeg" => Some(VaapiFeatures::DECODE_MPEG2),
            _ => None,
        }
    }
}

impl fmt::Display for VaapiFeatures {
    /// Canonical flag string, one `+name` per enabled bit
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter().filter_map(VaapiFeatures::flag_name);
        for (i, name) in names.enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "+{}", name)?;
        }
        Ok(())
    }
}

impl FromStr for VaapiFeatures {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_feature_flags(s)
    }
}

/// Parse a comma-separated `+name`/`-name` list into a feature set
///
/// Starts from the empty set. Errors carry the 1-based token position.
pub fn parse_feature_flags(input: &str) -> PipelineResult<VaapiFeatures> {
    let mut features = VaapiFeatures::empty();

    for (index, raw) in input.split(',').enumerate() {
        let position = index + 1;
        let token = raw.trim();

        let (enable, name) = if let Some(name) = token.strip_prefix('+') {
            (true, name)
        } else if let Some(name) = token.strip_prefix('-') {
            (false, name)
        } else {
            return Err(PipelineError::MalformedFeatureFlag {
                position,
                token: token.to_string(),
            });
        };

        let Some(named) = VaapiFeatures::from_flag_name(name) else {
            return Err(PipelineError::UnknownFeatureName {
                position,
                name: name.to_string(),
            });
        };

        if enable {
            features |= named;
        } else {
            features -= named;
        }
    }

    Ok(features)
}

/// Accelerated elements per feature, preferred first
///
/// Modern `va` plugin elements come before the legacy `vaapi` ones.
const ELEMENT_CANDIDATES: &[(VaapiFeatures, &[&str])] = &[
    (VaapiFeatures::DECODE_JPEG, &["vajpegdec", "vaapijpegdec"]),
    (VaapiFeatures::DECODE_H264, &["vah264dec", "vaapih264dec"]),
    (VaapiFeatures::DECODE_H265, &["vah265dec", "vaapih265dec"]),
    (VaapiFeatures::DECODE_VP8, &["vavp8dec", "vaapivp8dec"]),
    (VaapiFeatures::DECODE_VP9, &["vavp9dec", "vaapivp9dec"]),
    (VaapiFeatures::DECODE_MPEG2, &["vampeg2dec", "vaapimpeg2dec"]),
    (VaapiFeatures::CONVERT_INPUT, &["vapostproc", "vaapipostproc"]),
    (VaapiFeatures::CONVERT_OUTPUT, &["vapostproc", "vaapipostproc"]),
];

/// Parsers required in front of accelerated decoders
const DECODER_PARSERS: &[(VaapiFeatures, &str)] = &[
    (VaapiFeatures::DECODE_JPEG, "jpegparse"),
    (VaapiFeatures::DECODE_H264, "h264parse"),
    (VaapiFeatures::DECODE_H265, "h265parse"),
    (VaapiFeatures::DECODE_VP9, "vp9parse"),
    (VaapiFeatures::DECODE_MPEG2, "mpegvideoparse"),
];

/// Accelerated element candidates for a single feature bit
pub fn element_candidates(feature: VaapiFeatures) -> &'static [&'static str] {
    ELEMENT_CANDIDATES
        .iter()
        .find(|(candidate, _)| *candidate == feature)
        .map(|(_, elements)| *elements)
        .unwrap_or(&[])
}

/// Parser element an accelerated decoder needs in front of it
pub fn parser_for(feature: VaapiFeatures) -> Option<&'static str> {
    DECODER_PARSERS
        .iter()
        .find(|(candidate, _)| *candidate == feature)
        .map(|(_, parser)| *parser)
}

/// Detect which acceleration features have a usable element on this system
pub fn detect_available_features() -> VaapiFeatures {
    debug!("Detecting available VA-API elements");
    let mut available = VaapiFeatures::empty();

    for feature in VaapiFeatures::all().iter() {
        let found = element_candidates(feature)
            .iter()
            .find(|name| gstreamer::ElementFactory::find(name).is_some());
        match found {
            Some(element) => {
                debug!(feature = ?feature.flag_name(), element, "Accelerated element available");
                available |= feature;
            }
            None => debug!(feature = ?feature.flag_name(), "No accelerated element"),
        }
    }

    info!(features = %available, "VA-API feature detection finished");
    available
}
