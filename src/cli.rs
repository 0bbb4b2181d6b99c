// SPDX-License-Identifier: GPL-3.0-only

//! One-shot CLI commands that exit instead of running the pipeline

use webcam_filters::PipelineResult;
use webcam_filters::media::{query_capabilities, render_capability_table};

/// Print the capability table of `device`
pub fn list_dev_caps(device: &str) -> PipelineResult<()> {
    let capabilities = query_capabilities(device)?;
    println!("{}", render_capability_table(device, &capabilities));
    Ok(())
}
