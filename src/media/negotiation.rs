// SPDX-License-Identifier: GPL-3.0-only

//! Nearest-fit capture format selection
//!
//! ```text
//! capabilities ──► filter by media type ──► fixate each field ──► distance tuple
//!                                                                 (|Δw|, |Δh|, |Δfps|)
//!                                                                       │
//!                                        first after stable sort ◄──────┘
//! ```
//!
//! The tuple is compared lexicographically: width first, then height, then
//! framerate. Exactness on a later axis never beats a closer earlier axis.

use super::formats::{CapabilityDescriptor, DesiredFormat, FixedFormat, FramerateDistance};
use crate::errors::{PipelineError, PipelineResult};
use tracing::debug;

/// Distance of one fixated candidate from the desired format
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormatDistance {
    pub width: u32,
    pub height: u32,
    pub framerate: FramerateDistance,
}

/// Resolve every range and list in `capability` to the value nearest `desired`
///
/// Returns `None` when a field has no representable value (empty list).
pub fn fixate(capability: &CapabilityDescriptor, desired: &DesiredFormat) -> Option<FixedFormat> {
    Some(FixedFormat {
        media_type: capability.media_type.clone(),
        format: capability.format.clone(),
        width: capability.width.fixate_nearest(desired.width)?,
        height: capability.height.fixate_nearest(desired.height)?,
        framerate: capability.framerate.fixate_nearest(desired.framerate)?,
    })
}

/// Distance tuple of an already fixated format
pub fn distance(fixed: &FixedFormat, desired: &DesiredFormat) -> FormatDistance {
    FormatDistance {
        width: fixed.width.abs_diff(desired.width),
        height: fixed.height.abs_diff(desired.height),
        framerate: fixed.framerate.distance(&desired.framerate),
    }
}

/// Pick the capability closest to `desired`
///
/// Candidates are filtered strictly by `desired.media_type` when it is set.
/// Ties keep device enumeration order.
pub fn select_best_format(
    capabilities: &[CapabilityDescriptor],
    desired: &DesiredFormat,
) -> PipelineResult<FixedFormat> {
    let mut candidates: Vec<(FormatDistance, FixedFormat)> = capabilities
        .iter()
        .filter(|cap| match &desired.media_type {
            Some(media_type) => &cap.media_type == media_type,
            None => true,
        })
        .filter_map(|cap| fixate(cap, desired))
        .map(|fixed| (distance(&fixed, desired), fixed))
        .collect();

    if candidates.is_empty() {
        let reason = match &desired.media_type {
            Some(media_type) => format!(
                "device advertises no '{}' format among {} capabilities",
                media_type,
                capabilities.len()
            ),
            None => "device advertises no usable capabilities".to_string(),
        };
        return Err(PipelineError::NoMatchingFormat(reason));
    }

    // sort_by_key is stable
    candidates.sort_by_key(|(distance, _)| *distance);

    for (distance, fixed) in &candidates {
        debug!(
            candidate = %fixed,
            dw = distance.width,
            dh = distance.height,
            dfps = distance.framerate.as_f64(),
            "Format candidate"
        );
    }

    let (_, best) = candidates.swap_remove(0);
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::formats::{FractionValue, Framerate, IntValue};

    fn desired(width: u32, height: u32, fps: u32) -> DesiredFormat {
        DesiredFormat {
            width,
            height,
            framerate: Framerate::from_int(fps),
            media_type: None,
        }
    }

    #[test]
    fn test_width_dominates_framerate() {
        let caps = vec![
            CapabilityDescriptor::fixed("image/jpeg", 1280, 720, Framerate::from_int(5)),
            CapabilityDescriptor::fixed("image/jpeg", 1024, 720, Framerate::from_int(30)),
        ];
        let best = select_best_format(&caps, &desired(1280, 720, 30)).unwrap();
        assert_eq!(best.width, 1280);
        assert_eq!(best.framerate, Framerate::from_int(5));
    }

    #[test]
    fn test_ranges_are_fixated_before_scoring() {
        let caps = vec![
            CapabilityDescriptor::fixed("video/x-raw", 640, 480, Framerate::from_int(30)),
            CapabilityDescriptor {
                media_type: "video/x-raw".to_string(),
                format: Some("YUY2".to_string()),
                width: IntValue::range(320, 1920),
                height: IntValue::range(240, 1080),
                framerate: FractionValue::Range {
                    min: Framerate::from_int(1),
                    max: Framerate::from_int(15),
                },
            },
        ];
        let best = select_best_format(&caps, &desired(1280, 720, 30)).unwrap();
        assert_eq!((best.width, best.height), (1280, 720));
        assert_eq!(best.framerate, Framerate::from_int(15));
        assert_eq!(best.format.as_deref(), Some("YUY2"));
    }

    #[test]
    fn test_identical_distances_keep_enumeration_order() {
        let caps = vec![
            CapabilityDescriptor::fixed("image/jpeg", 1280, 720, Framerate::from_int(30)),
            CapabilityDescriptor::fixed("video/x-raw", 1280, 720, Framerate::from_int(30)),
        ];
        let best = select_best_format(&caps, &desired(1280, 720, 30)).unwrap();
        assert_eq!(best.media_type, "image/jpeg");
    }

    #[test]
    fn test_empty_capabilities() {
        let err = select_best_format(&[], &desired(1280, 720, 30)).unwrap_err();
        assert!(matches!(err, PipelineError::NoMatchingFormat(_)));
    }
}
