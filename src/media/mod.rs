// SPDX-License-Identifier: MPL-2.0

//! Capture format handling and hardware acceleration discovery
//!
//! # Capabilities
//!
//! [`caps`] asks a V4L2 device what it can deliver and renders the answer as
//! a table. [`negotiation`] picks the advertised format nearest the one the
//! user asked for.
//!
//! # Hardware acceleration
//!
//! [`hwaccel`] parses the VA-API feature flags and finds which accelerated
//! decoders and converters are installed.
//!
//! # Modules
//!
//! - [`caps`]: Device capability query and listing
//! - [`formats`]: Capability, desired and fixed format types
//! - [`hwaccel`]: VA-API feature set and element detection
//! - [`negotiation`]: Nearest-fit format selection

pub mod caps;
pub mod formats;
pub mod hwaccel;
pub mod negotiation;

// Re-export commonly used types
pub use caps::{query_capabilities, render_capability_table};
pub use formats::{CapabilityDescriptor, DesiredFormat, FixedFormat, Framerate};
pub use hwaccel::{VaapiFeatures, parse_feature_flags};
pub use negotiation::select_best_format;
