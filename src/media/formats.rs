// SPDX-License-Identifier: GPL-3.0-only

//! Capability and format types shared by negotiation and graph building
//!
//! A device advertises [`CapabilityDescriptor`]s whose fields may be fixed
//! values, ranges or lists. Negotiation resolves one of them against a
//! [`DesiredFormat`] into a [`FixedFormat`] with no ranges left.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Framerate as a fraction (numerator/denominator)
///
/// Comparison is by value, so `60/2 == 30/1`.
#[derive(Debug, Clone, Copy)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Convert to a GStreamer fraction, saturating at `i32::MAX`
    pub fn as_gst_fraction(&self) -> gstreamer::Fraction {
        let num = i32::try_from(self.num).unwrap_or(i32::MAX);
        let denom = i32::try_from(self.denom).unwrap_or(i32::MAX);
        gstreamer::Fraction::new(num, denom)
    }

    /// Duration of one frame in nanoseconds, `None` for a zero framerate
    pub fn frame_period_ns(&self) -> Option<u64> {
        if self.num == 0 {
            return None;
        }
        Some(self.denom as u64 * 1_000_000_000 / self.num as u64)
    }

    /// Exact absolute difference between two framerates
    pub fn distance(&self, other: &Framerate) -> FramerateDistance {
        let lhs = self.num as u64 * other.denom as u64;
        let rhs = other.num as u64 * self.denom as u64;
        FramerateDistance {
            num: lhs.abs_diff(rhs),
            denom: self.denom as u64 * other.denom as u64,
        }
    }

    fn cross(&self, other: &Framerate) -> (u64, u64) {
        (
            self.num as u64 * other.denom as u64,
            other.num as u64 * self.denom as u64,
        )
    }
}

impl PartialEq for Framerate {
    fn eq(&self, other: &Self) -> bool {
        let (lhs, rhs) = self.cross(other);
        lhs == rhs
    }
}

impl Eq for Framerate {}

impl PartialOrd for Framerate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Framerate {
    fn cmp(&self, other: &Self) -> Ordering {
        let (lhs, rhs) = self.cross(other);
        lhs.cmp(&rhs)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.denom)
    }
}

impl FromStr for Framerate {
    type Err = String;

    /// Parses `"30/1"`, `"30000/1001"` or a bare integer such as `"30"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num, denom) = match s.split_once('/') {
            Some((num, denom)) => (num.trim(), denom.trim()),
            None => (s, "1"),
        };
        let num: u32 = num
            .parse()
            .map_err(|_| format!("invalid framerate numerator in '{}'", s))?;
        let denom: u32 = denom
            .parse()
            .map_err(|_| format!("invalid framerate denominator in '{}'", s))?;
        if denom == 0 {
            return Err(format!("framerate denominator must not be zero in '{}'", s));
        }
        Ok(Framerate { num, denom })
    }
}

impl From<gstreamer::Fraction> for Framerate {
    fn from(fraction: gstreamer::Fraction) -> Self {
        Framerate::new(
            fraction.numer().max(0) as u32,
            fraction.denom().max(0) as u32,
        )
    }
}

/// Exact non-negative rational `num/denom`, ordered by value
#[derive(Debug, Clone, Copy)]
pub struct FramerateDistance {
    num: u64,
    denom: u64,
}

impl FramerateDistance {
    pub const ZERO: FramerateDistance = FramerateDistance { num: 0, denom: 1 };

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }
}

impl PartialEq for FramerateDistance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FramerateDistance {}

impl PartialOrd for FramerateDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FramerateDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as u128 * other.denom as u128;
        let rhs = other.num as u128 * self.denom as u128;
        lhs.cmp(&rhs)
    }
}

/// Integer capability field: fixed, stepped range or list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntValue {
    Fixed(u32),
    Range { min: u32, max: u32, step: u32 },
    List(Vec<u32>),
}

impl IntValue {
    /// Plain range with step 1
    pub fn range(min: u32, max: u32) -> Self {
        IntValue::Range { min, max, step: 1 }
    }

    /// Nearest representable value to `target`
    ///
    /// Ties resolve to the lower value for ranges and to the earlier entry for
    /// lists. Returns `None` only for an empty list or an inverted range.
    pub fn fixate_nearest(&self, target: u32) -> Option<u32> {
        match self {
            IntValue::Fixed(value) => Some(*value),
            IntValue::Range { min, max, step } => {
                if min > max {
                    return None;
                }
                let step = (*step).max(1);
                let highest = min + (max - min) / step * step;
                if target <= *min {
                    return Some(*min);
                }
                if target >= highest {
                    return Some(highest);
                }
                let below = min + (target - min) / step * step;
                let above = below + step;
                if target - below <= above - target {
                    Some(below)
                } else {
                    Some(above)
                }
            }
            IntValue::List(values) => values
                .iter()
                .copied()
                .min_by_key(|value| value.abs_diff(target)),
        }
    }
}

impl fmt::Display for IntValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntValue::Fixed(value) => write!(f, "{}", value),
            IntValue::Range { min, max, step } if *step <= 1 => {
                write!(f, "[ {}, {} ]", min, max)
            }
            IntValue::Range { min, max, step } => write!(f, "[ {}, {}, {} ]", min, max, step),
            IntValue::List(values) => write_list(f, values),
        }
    }
}

/// Framerate capability field: fixed, range or list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FractionValue {
    Fixed(Framerate),
    Range { min: Framerate, max: Framerate },
    List(Vec<Framerate>),
}

impl FractionValue {
    /// Nearest representable framerate to `target`
    ///
    /// Any rational inside a range is representable, so a target within the
    /// range fixates to itself.
    pub fn fixate_nearest(&self, target: Framerate) -> Option<Framerate> {
        match self {
            FractionValue::Fixed(value) => Some(*value),
            FractionValue::Range { min, max } => {
                if min > max {
                    None
                } else if target < *min {
                    Some(*min)
                } else if target > *max {
                    Some(*max)
                } else {
                    Some(target)
                }
            }
            FractionValue::List(values) => values
                .iter()
                .copied()
                .min_by_key(|value| value.distance(&target)),
        }
    }
}

impl fmt::Display for FractionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FractionValue::Fixed(value) => write!(f, "{}", value),
            FractionValue::Range { min, max } => write!(f, "[ {}, {} ]", min, max),
            FractionValue::List(values) => write_list(f, values),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    write!(f, "{{ ")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value)?;
    }
    write!(f, " }}")
}

/// One advertised device format, possibly with ranges instead of fixed values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Caps structure name, e.g. `image/jpeg` or `video/x-raw`
    pub media_type: String,
    /// Raw pixel layout (`YUY2`, `NV12`, ...) when the device pins one
    pub format: Option<String>,
    pub width: IntValue,
    pub height: IntValue,
    pub framerate: FractionValue,
}

impl CapabilityDescriptor {
    /// Descriptor with every field fixed
    pub fn fixed(media_type: &str, width: u32, height: u32, framerate: Framerate) -> Self {
        Self {
            media_type: media_type.to_string(),
            format: None,
            width: IntValue::Fixed(width),
            height: IntValue::Fixed(height),
            framerate: FractionValue::Fixed(framerate),
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

/// User-supplied target format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
    /// Restrict candidates to this exact media type
    pub media_type: Option<String>,
}

impl Default for DesiredFormat {
    fn default() -> Self {
        use crate::constants::defaults;
        Self {
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            framerate: Framerate::new(defaults::FRAMERATE.0, defaults::FRAMERATE.1),
            media_type: None,
        }
    }
}

/// Fully resolved capture format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedFormat {
    pub media_type: String,
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
}

impl FixedFormat {
    /// Whether the source already delivers raw frames
    pub fn is_raw(&self) -> bool {
        self.media_type == "video/x-raw"
    }

    /// Caps for the input filter directly behind the source
    pub fn to_caps(&self) -> gstreamer::Caps {
        let mut builder = gstreamer::Caps::builder(self.media_type.as_str())
            .field("width", self.width as i32)
            .field("height", self.height as i32)
            .field("framerate", self.framerate.as_gst_fraction());
        if let Some(format) = &self.format {
            builder = builder.field("format", format.as_str());
        }
        builder.build()
    }
}

impl fmt::Display for FixedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_type)?;
        if let Some(format) = &self.format {
            write!(f, " ({})", format)?;
        }
        write!(f, " {}x{} @ {}", self.width, self.height, self.framerate)
    }
}
