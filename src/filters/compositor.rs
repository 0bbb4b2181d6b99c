// SPDX-License-Identifier: GPL-3.0-only

//! Three-input conditional compositor ("where")
//!
//! ```text
//! condition (mask) ──┐
//! x (original)     ──┼──► out[i] = condition[i] != 0 ? x[i] : y[i]
//! y (blurred)      ──┘
//! ```
//!
//! Inputs arrive on single-slot channels. One output frame is produced per
//! input triple, stamped with the condition frame's timestamps. The output
//! buffer is allocated once and reused.

use super::frame::FrameBuffer;
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::{PipelineError, PipelineResult};
use crossbeam_channel::{Receiver, select};
use tracing::{debug, info};

/// Whether the downstream sink still accepts frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFlow {
    Continue,
    /// Downstream is flushing or finished; stop quietly
    Stop,
}

/// Destination of composited frames
pub trait FrameSink: Send {
    fn push_frame(&mut self, frame: &FrameBuffer) -> PipelineResult<SinkFlow>;

    fn end_of_stream(&mut self) -> PipelineResult<()>;
}

/// Per-pixel select over three equally sized frames
#[derive(Debug)]
pub struct WhereCompositor {
    output: FrameBuffer,
    /// Largest accepted pts difference between inputs
    tolerance_ns: Option<u64>,
    frames: u64,
}

impl WhereCompositor {
    /// Compositor for frames of exactly `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            output: FrameBuffer::new(width, height),
            tolerance_ns: None,
            frames: 0,
        }
    }

    /// Reject triples whose timestamps differ by more than `tolerance_ns`
    pub fn with_timestamp_tolerance(mut self, tolerance_ns: u64) -> Self {
        self.tolerance_ns = Some(tolerance_ns);
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Composite one triple into the reused output buffer
    ///
    /// Fails without touching the output when geometry or timing disagree.
    pub fn composite(
        &mut self,
        condition: &FrameBuffer,
        x: &FrameBuffer,
        y: &FrameBuffer,
    ) -> PipelineResult<&FrameBuffer> {
        let expected = self.output.geometry();
        for (name, frame) in [("condition", condition), ("x", x), ("y", y)] {
            if frame.geometry() != expected {
                return Err(PipelineError::BufferGeometryMismatch(format!(
                    "{} input is {}x{}, expected {}x{} (condition {}x{}, x {}x{}, y {}x{})",
                    name,
                    frame.width(),
                    frame.height(),
                    expected.0,
                    expected.1,
                    condition.width(),
                    condition.height(),
                    x.width(),
                    x.height(),
                    y.width(),
                    y.height()
                )));
            }
        }

        if let (Some(tolerance), Some(reference)) = (self.tolerance_ns, condition.pts) {
            for (name, frame) in [("x", x), ("y", y)] {
                if let Some(pts) = frame.pts
                    && pts.abs_diff(reference) > tolerance
                {
                    return Err(PipelineError::BufferGeometryMismatch(format!(
                        "{} input pts {} ns is {} ns away from condition pts {} ns",
                        name,
                        pts,
                        pts.abs_diff(reference),
                        reference
                    )));
                }
            }
        }

        for (((out, c), xv), yv) in self
            .output
            .data_mut()
            .iter_mut()
            .zip(condition.data())
            .zip(x.data())
            .zip(y.data())
        {
            *out = if *c != 0 { *xv } else { *yv };
        }
        self.output.copy_timestamps_from(condition);
        self.frames += 1;

        Ok(&self.output)
    }
}

/// Receiving ends of the three compositor inputs
pub struct CompositorInputs {
    pub condition: Receiver<FrameBuffer>,
    pub x: Receiver<FrameBuffer>,
    pub y: Receiver<FrameBuffer>,
}

enum Slot {
    Frame(FrameBuffer),
    Ended,
    Cancelled,
}

fn next(input: &Receiver<FrameBuffer>, shutdown: &Receiver<()>) -> Slot {
    select! {
        recv(input) -> msg => match msg {
            Ok(frame) => Slot::Frame(frame),
            Err(_) => Slot::Ended,
        },
        recv(shutdown) -> _ => Slot::Cancelled,
    }
}

/// Drive the compositor until end-of-stream, cancellation or failure
///
/// A sender dropping is end-of-stream for that input. All three must end
/// together; an input ending while another still delivers a frame means the
/// branches lost alignment.
pub fn run_compositor(
    mut compositor: WhereCompositor,
    inputs: CompositorInputs,
    shutdown: &Receiver<()>,
    sink: &mut dyn FrameSink,
) -> PipelineResult<()> {
    loop {
        let condition = next(&inputs.condition, shutdown);
        let x = next(&inputs.x, shutdown);
        let y = next(&inputs.y, shutdown);

        let (condition, x, y) = match (condition, x, y) {
            (Slot::Cancelled, _, _) | (_, Slot::Cancelled, _) | (_, _, Slot::Cancelled) => {
                debug!(frames = compositor.frames(), "Compositor cancelled");
                return Ok(());
            }
            (Slot::Frame(c), Slot::Frame(x), Slot::Frame(y)) => (c, x, y),
            (Slot::Ended, Slot::Ended, Slot::Ended) => {
                info!(frames = compositor.frames(), "Compositor reached end of stream");
                return sink.end_of_stream();
            }
            (c, x, y) => {
                let state = |slot: &Slot| match slot {
                    Slot::Ended => "ended",
                    _ => "frame",
                };
                return Err(PipelineError::BufferGeometryMismatch(format!(
                    "inputs ended unevenly after {} frames (condition {}, x {}, y {})",
                    compositor.frames(),
                    state(&c),
                    state(&x),
                    state(&y)
                )));
            }
        };

        let output = compositor.composite(&condition, &x, &y)?;
        if sink.push_frame(output)? == SinkFlow::Stop {
            debug!(frames = compositor.frames(), "Sink stopped accepting frames");
            return Ok(());
        }

        if compositor.frames() % FRAME_LOG_INTERVAL == 0 {
            debug!(frame = compositor.frames(), pts = ?condition.pts, "Composited frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_is_reused() {
        let mut compositor = WhereCompositor::new(2, 2);
        let c = FrameBuffer::filled(2, 2, [0xFF; 3]);
        let x = FrameBuffer::filled(2, 2, [1, 2, 3]);
        let y = FrameBuffer::filled(2, 2, [4, 5, 6]);

        let first = compositor.composite(&c, &x, &y).unwrap().data().as_ptr();
        let second = compositor.composite(&c, &y, &x).unwrap().data().as_ptr();
        assert_eq!(first, second);
        assert_eq!(compositor.frames(), 2);
    }

    #[test]
    fn test_timestamps_come_from_condition() {
        let mut compositor = WhereCompositor::new(1, 1);
        let mut c = FrameBuffer::new(1, 1);
        c.pts = Some(1_000);
        c.dts = Some(900);
        c.duration = Some(33_333_333);
        let mut x = FrameBuffer::new(1, 1);
        x.pts = Some(5);
        let y = FrameBuffer::new(1, 1);

        let out = compositor.composite(&c, &x, &y).unwrap();
        assert_eq!((out.pts, out.dts, out.duration), (Some(1_000), Some(900), Some(33_333_333)));
    }

    #[test]
    fn test_timestamp_tolerance() {
        let mut compositor = WhereCompositor::new(1, 1).with_timestamp_tolerance(40_000_000);
        let mut c = FrameBuffer::new(1, 1);
        c.pts = Some(100_000_000);
        let mut x = FrameBuffer::new(1, 1);
        x.pts = Some(100_000_000);
        let mut y = FrameBuffer::new(1, 1);
        y.pts = Some(200_000_000);

        assert!(matches!(
            compositor.composite(&c, &x, &y),
            Err(PipelineError::BufferGeometryMismatch(_))
        ));
        y.pts = Some(130_000_000);
        assert!(compositor.composite(&c, &x, &y).is_ok());
    }
}
