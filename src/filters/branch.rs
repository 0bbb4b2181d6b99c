// SPDX-License-Identifier: GPL-3.0-only

//! In-process filtering branch
//!
//! ```text
//!              ┌─► [queue] ─► segmentation thread ─► [slot] ─┐ condition
//! Splitter ────┼─► [queue] ─► blur thread ─────────► [slot] ─┼─► compositor thread ─► FrameSink
//!              └─────────────────────────────────► [slot] ───┘ x
//! ```
//!
//! Every channel is bounded, so a slow segmentation model throttles the
//! splitter and, through it, the capture source. Dropping the splitter is
//! end-of-stream. Dropping the shutdown sender cancels every thread, even
//! ones blocked on a full or empty channel.

use super::box_blur::BoxBlur;
use super::compositor::{CompositorInputs, FrameSink, SinkFlow, WhereCompositor, run_compositor};
use super::frame::FrameBuffer;
use super::segmentation::Segmenter;
use crate::constants::pipeline::COMPOSITOR_SLOT_DEPTH;
use crate::errors::{PipelineError, PipelineResult};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

type FailureNotifier = Arc<dyn Fn(&PipelineError) + Send + Sync>;

/// First error raised inside the branch
#[derive(Clone)]
pub struct FailureSlot {
    error: Arc<Mutex<Option<PipelineError>>>,
    notify: FailureNotifier,
}

impl FailureSlot {
    /// Slot that calls `notify` once, for the first recorded failure
    pub fn new(notify: impl Fn(&PipelineError) + Send + Sync + 'static) -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
            notify: Arc::new(notify),
        }
    }

    pub fn record(&self, err: PipelineError) {
        error!(error = %err, "Filter branch failed");
        let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            (self.notify)(&err);
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<PipelineError> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Send `frame`, giving up when the branch is cancelled or the receiver is gone
fn send_or_stop(tx: &Sender<FrameBuffer>, frame: FrameBuffer, shutdown: &Receiver<()>) -> SinkFlow {
    select! {
        send(tx, frame) -> res => match res {
            Ok(()) => SinkFlow::Continue,
            Err(_) => SinkFlow::Stop,
        },
        recv(shutdown) -> _ => SinkFlow::Stop,
    }
}

/// Fan-out point feeding the three branches
pub struct Splitter {
    segmentation: Sender<FrameBuffer>,
    blur: Sender<FrameBuffer>,
    passthrough: Sender<FrameBuffer>,
    shutdown: Receiver<()>,
}

impl Splitter {
    /// Hand one frame to every branch; blocks while any branch is full
    pub fn push(&self, frame: FrameBuffer) -> SinkFlow {
        let outputs = [
            (&self.segmentation, frame.clone()),
            (&self.blur, frame.clone()),
            (&self.passthrough, frame),
        ];
        for (tx, copy) in outputs {
            if send_or_stop(tx, copy, &self.shutdown) == SinkFlow::Stop {
                return SinkFlow::Stop;
            }
        }
        SinkFlow::Continue
    }
}

/// Everything the branch threads own
pub struct BranchSpec {
    pub segmenter: Segmenter,
    pub blur: BoxBlur,
    pub compositor: WhereCompositor,
    pub sink: Box<dyn FrameSink>,
    /// Capacity of the queues ahead of segmentation and blur
    pub queue_depth: usize,
}

/// Running worker threads of the filtering branch
pub struct FilterBranch {
    workers: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: Option<Sender<()>>,
    failure: FailureSlot,
}

impl FilterBranch {
    /// Start the segmentation, blur and compositor threads
    ///
    /// Returns the branch handle and the splitter that feeds it.
    pub fn spawn(spec: BranchSpec, failure: FailureSlot) -> PipelineResult<(FilterBranch, Splitter)> {
        let queue_depth = spec.queue_depth.max(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let (seg_tx, seg_rx) = bounded(queue_depth);
        let (blur_tx, blur_rx) = bounded(queue_depth);
        let (x_tx, x_rx) = bounded(COMPOSITOR_SLOT_DEPTH);
        let (condition_tx, condition_rx) = bounded(COMPOSITOR_SLOT_DEPTH);
        let (y_tx, y_rx) = bounded(COMPOSITOR_SLOT_DEPTH);

        let mut branch = FilterBranch {
            workers: Vec::with_capacity(3),
            shutdown: Some(shutdown_tx),
            failure: failure.clone(),
        };

        let mut segmenter = spec.segmenter;
        branch.spawn_stage(
            "segmentation",
            seg_rx,
            condition_tx,
            shutdown_rx.clone(),
            move |frame| segmenter.process(frame),
        )?;

        let mut blur = spec.blur;
        branch.spawn_stage(
            "box-blur",
            blur_rx,
            y_tx,
            shutdown_rx.clone(),
            move |frame| blur.apply(frame),
        )?;

        let inputs = CompositorInputs {
            condition: condition_rx,
            x: x_rx,
            y: y_rx,
        };
        let compositor = spec.compositor;
        let mut sink = spec.sink;
        let compositor_shutdown = shutdown_rx.clone();
        let compositor_failure = failure;
        branch.spawn_thread("compositor", move || {
            if let Err(e) = run_compositor(compositor, inputs, &compositor_shutdown, sink.as_mut()) {
                compositor_failure.record(e);
            }
        })?;

        info!(queue_depth, "Filter branch started");

        let splitter = Splitter {
            segmentation: seg_tx,
            blur: blur_tx,
            passthrough: x_tx,
            shutdown: shutdown_rx,
        };
        Ok((branch, splitter))
    }

    fn spawn_stage<F>(
        &mut self,
        name: &'static str,
        input: Receiver<FrameBuffer>,
        output: Sender<FrameBuffer>,
        shutdown: Receiver<()>,
        mut process: F,
    ) -> PipelineResult<()>
    where
        F: FnMut(&mut FrameBuffer) -> PipelineResult<()> + Send + 'static,
    {
        let failure = self.failure.clone();
        self.spawn_thread(name, move || {
            let mut frames: u64 = 0;
            loop {
                let mut frame = select! {
                    recv(input) -> msg => match msg {
                        Ok(frame) => frame,
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                };
                if let Err(e) = process(&mut frame) {
                    failure.record(e);
                    break;
                }
                frames += 1;
                if send_or_stop(&output, frame, &shutdown) == SinkFlow::Stop {
                    break;
                }
            }
            debug!(stage = name, frames, "Branch stage finished");
        })
    }

    fn spawn_thread(
        &mut self,
        name: &'static str,
        body: impl FnOnce() + Send + 'static,
    ) -> PipelineResult<()> {
        let handle = std::thread::Builder::new()
            .name(format!("filter-{}", name))
            .spawn(body)
            .map_err(|e| {
                PipelineError::PipelineBuild(format!("failed to start {} thread: {}", name, e))
            })?;
        self.workers.push((name, handle));
        Ok(())
    }

    /// Wake and stop every thread; in-flight frames are discarded
    pub fn cancel(&mut self) {
        if self.shutdown.take().is_some() {
            debug!("Cancelling filter branch");
        }
    }

    /// Wait for every thread to exit
    pub fn join(&mut self) {
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(stage = name, "Filter branch thread panicked");
                self.failure
                    .record(PipelineError::element(name, "worker thread panicked"));
            }
        }
    }

    /// First failure raised by any branch thread
    pub fn take_failure(&self) -> Option<PipelineError> {
        self.failure.take()
    }
}

impl Drop for FilterBranch {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::segmentation::{ProbabilityMap, SegmentationModel};

    struct AllForeground;

    impl SegmentationModel for AllForeground {
        fn segment(&mut self, frame: &FrameBuffer) -> PipelineResult<ProbabilityMap> {
            Ok(ProbabilityMap::uniform(frame.width(), frame.height(), 1.0))
        }
    }

    #[derive(Clone, Default)]
    struct Collected(Arc<Mutex<(Vec<FrameBuffer>, bool)>>);

    impl FrameSink for Collected {
        fn push_frame(&mut self, frame: &FrameBuffer) -> PipelineResult<SinkFlow> {
            self.0.lock().unwrap().0.push(frame.clone());
            Ok(SinkFlow::Continue)
        }

        fn end_of_stream(&mut self) -> PipelineResult<()> {
            self.0.lock().unwrap().1 = true;
            Ok(())
        }
    }

    #[test]
    fn test_cancel_unblocks_idle_branch() {
        let spec = BranchSpec {
            segmenter: Segmenter::new(Box::new(AllForeground), 0.5),
            blur: BoxBlur::new(3).unwrap(),
            compositor: WhereCompositor::new(4, 4),
            sink: Box::new(Collected::default()),
            queue_depth: 2,
        };
        let (mut branch, _splitter) = FilterBranch::spawn(spec, FailureSlot::new(|_| {})).unwrap();

        // The splitter is still alive, so only cancellation can end the threads
        branch.cancel();
        branch.join();
        assert!(branch.take_failure().is_none());
    }

    #[test]
    fn test_failure_slot_keeps_first_error() {
        let notified = Arc::new(Mutex::new(0));
        let counter = notified.clone();
        let slot = FailureSlot::new(move |_| *counter.lock().unwrap() += 1);

        slot.record(PipelineError::element("a", "first"));
        slot.record(PipelineError::element("b", "second"));

        assert_eq!(*notified.lock().unwrap(), 1);
        assert_eq!(slot.take(), Some(PipelineError::element("a", "first")));
        assert_eq!(slot.take(), None);
    }
}
