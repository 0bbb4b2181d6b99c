// SPDX-License-Identifier: GPL-3.0-only

//! Device capability query and listing
//!
//! The device is opened by taking a bare `v4l2src` to READY, which is just
//! far enough for the driver to enumerate formats. The element is returned
//! to NULL (closing the device node) before the function returns, on every
//! path.

use super::formats::{CapabilityDescriptor, FractionValue, Framerate, IntValue};
use crate::constants::timing;
use crate::errors::{PipelineError, PipelineResult};
use gstreamer::prelude::*;
use tracing::{debug, info, warn};

/// Puts the probe element back to NULL when dropped
struct ProbeGuard(gstreamer::Element);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to release capability probe");
        }
    }
}

/// Enumerate the formats a V4L2 device advertises
pub fn query_capabilities(device: &str) -> PipelineResult<Vec<CapabilityDescriptor>> {
    gstreamer::init()
        .map_err(|e| PipelineError::DeviceUnavailable(format!("GStreamer init failed: {}", e)))?;

    let source = gstreamer::ElementFactory::make("v4l2src")
        .name("caps_probe")
        .property("device", device)
        .build()
        .map_err(|e| PipelineError::PipelineBuild(format!("Failed to create v4l2src: {}", e)))?;
    let probe = ProbeGuard(source);

    probe
        .0
        .set_state(gstreamer::State::Ready)
        .map_err(|e| PipelineError::DeviceUnavailable(format!("{}: {}", device, e)))?;

    let (result, state, _pending) = probe
        .0
        .state(gstreamer::ClockTime::from_mseconds(
            timing::CAPS_QUERY_TIMEOUT.as_millis() as u64,
        ));
    if result.is_err() || state != gstreamer::State::Ready {
        return Err(PipelineError::DeviceUnavailable(format!(
            "{}: device did not reach READY (state: {:?})",
            device, state
        )));
    }

    let pad = probe.0.static_pad("src").ok_or_else(|| {
        PipelineError::DeviceUnavailable(format!("{}: source has no src pad", device))
    })?;
    let caps = pad.query_caps(None);
    drop(probe);

    if caps.is_any() || caps.is_empty() {
        return Err(PipelineError::DeviceUnavailable(format!(
            "{}: device did not report concrete capabilities",
            device
        )));
    }

    let descriptors = descriptors_from_caps(&caps);
    info!(device, count = descriptors.len(), "Queried device capabilities");
    Ok(descriptors)
}

/// Convert GStreamer caps into descriptors, skipping structures without
/// width, height or framerate
pub fn descriptors_from_caps(caps: &gstreamer::CapsRef) -> Vec<CapabilityDescriptor> {
    caps.iter()
        .filter_map(|structure| {
            let descriptor = descriptor_from_structure(structure);
            if descriptor.is_none() {
                debug!(structure = %structure, "Skipping incomplete capability");
            }
            descriptor
        })
        .collect()
}

fn descriptor_from_structure(structure: &gstreamer::StructureRef) -> Option<CapabilityDescriptor> {
    Some(CapabilityDescriptor {
        media_type: structure.name().to_string(),
        format: structure.get::<String>("format").ok(),
        width: int_field(structure, "width")?,
        height: int_field(structure, "height")?,
        framerate: fraction_field(structure, "framerate")?,
    })
}

fn int_field(structure: &gstreamer::StructureRef, field: &str) -> Option<IntValue> {
    let value = structure.value(field).ok()?;

    if let Ok(fixed) = value.get::<i32>() {
        return Some(IntValue::Fixed(u32::try_from(fixed).ok()?));
    }
    if let Ok(range) = value.get::<gstreamer::IntRange<i32>>() {
        return Some(IntValue::Range {
            min: range.min().max(0) as u32,
            max: range.max().max(0) as u32,
            step: range.step().max(1) as u32,
        });
    }
    if let Ok(list) = value.get::<gstreamer::List>() {
        let values: Vec<u32> = list
            .iter()
            .filter_map(|v| v.get::<i32>().ok())
            .filter_map(|v| u32::try_from(v).ok())
            .collect();
        return (!values.is_empty()).then_some(IntValue::List(values));
    }
    None
}

fn fraction_field(structure: &gstreamer::StructureRef, field: &str) -> Option<FractionValue> {
    let value = structure.value(field).ok()?;

    if let Ok(fixed) = value.get::<gstreamer::Fraction>() {
        return Some(FractionValue::Fixed(Framerate::from(fixed)));
    }
    if let Ok(range) = value.get::<gstreamer::FractionRange>() {
        return Some(FractionValue::Range {
            min: Framerate::from(range.min()),
            max: Framerate::from(range.max()),
        });
    }
    if let Ok(list) = value.get::<gstreamer::List>() {
        let values: Vec<Framerate> = list
            .iter()
            .filter_map(|v| v.get::<gstreamer::Fraction>().ok())
            .map(Framerate::from)
            .collect();
        return (!values.is_empty()).then_some(FractionValue::List(values));
    }
    None
}

const TABLE_HEADERS: [&str; 4] = ["Media Type", "Width", "Height", "Framerate"];

/// Render capabilities as a boxed text table titled after the device
pub fn render_capability_table(device: &str, capabilities: &[CapabilityDescriptor]) -> String {
    let rows: Vec<[String; 4]> = capabilities
        .iter()
        .map(|cap| {
            [
                cap.media_type.clone(),
                cap.width.to_string(),
                cap.height.to_string(),
                cap.framerate.to_string(),
            ]
        })
        .collect();

    let mut widths = TABLE_HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = |left: char, mid: char, right: char| {
        let mut line = String::new();
        line.push(left);
        for (i, width) in widths.iter().enumerate() {
            if i > 0 {
                line.push(mid);
            }
            line.push_str(&"─".repeat(width + 2));
        }
        line.push(right);
        line.push('\n');
        line
    };
    let row_line = |cells: &[String]| {
        let mut line = String::from("│");
        for (cell, width) in cells.iter().zip(widths) {
            line.push_str(&format!(" {:<width$} │", cell, width = width));
        }
        line.push('\n');
        line
    };

    let title = format!("'{}' Capabilities", device);
    let table_width = widths.iter().map(|w| w + 3).sum::<usize>() + 1;
    let mut out = format!("{:^width$}\n", title, width = table_width);
    out.push_str(&border('┌', '┬', '┐'));
    out.push_str(&row_line(&TABLE_HEADERS.map(String::from)));
    out.push_str(&border('├', '┼', '┤'));
    for row in &rows {
        out.push_str(&row_line(row));
    }
    out.push_str(&border('└', '┴', '┘'));
    out
}
