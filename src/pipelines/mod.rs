// SPDX-License-Identifier: GPL-3.0-only

//! Capture-to-loopback processing pipeline
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌────────────────┐   ┌─────────────┐
//! │  v4l2src   │ ─▶│ decode/convert │ ─▶│ filter branch  │ ─▶│  v4l2sink   │
//! │ (camera)   │   │  SW or VA-API  │   │ (when blurred) │   │ (loopback)  │
//! └────────────┘   └────────────────┘   └────────────────┘   └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`graph`]: Typed node/edge graph and stage selection
//! - [`assemble`]: Lowering of the graph into GStreamer elements
//! - [`runner`]: State transitions, bus loop and shutdown

pub mod assemble;
pub mod graph;
pub mod runner;

pub use assemble::{AssembledPipeline, assemble};
pub use graph::{ElementRegistry, Graph, GstRegistry, NodeKind, Placement, build_graph};
pub use runner::{PipelineRunner, PipelineState, RunOutcome, run};
