// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline lifecycle and bus handling
//!
//! State changes always move one step at a time:
//!
//! ```text
//! Null ⇄ Ready ⇄ Paused ⇄ Playing
//! ```
//!
//! The bus is polled on the calling thread. End-of-stream and interruption
//! are successful outcomes; an error message ends the run with the first
//! failure the filter branch recorded, or the bus error itself.

use super::assemble::{AssembledPipeline, assemble};
use super::graph::{GstRegistry, build_graph};
use crate::config::PipelineConfig;
use crate::constants::timing::{BUS_POLL_INTERVAL, STATE_CHANGE_TIMEOUT};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::hwaccel::detect_available_features;
use crate::media::{query_capabilities, select_best_format};
use gstreamer as gst;
use gstreamer::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl PipelineState {
    const ORDER: [PipelineState; 4] = [
        PipelineState::Null,
        PipelineState::Ready,
        PipelineState::Paused,
        PipelineState::Playing,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Single-step transitions from `from` to `to`, in order
    pub fn path(from: PipelineState, to: PipelineState) -> Vec<(PipelineState, PipelineState)> {
        let (a, b) = (from.index(), to.index());
        let states: Vec<PipelineState> = if a <= b {
            Self::ORDER[a..=b].to_vec()
        } else {
            Self::ORDER[b..=a].iter().rev().copied().collect()
        };
        states.windows(2).map(|w| (w[0], w[1])).collect()
    }

    pub fn to_gst(self) -> gst::State {
        match self {
            PipelineState::Null => gst::State::Null,
            PipelineState::Ready => gst::State::Ready,
            PipelineState::Paused => gst::State::Paused,
            PipelineState::Playing => gst::State::Playing,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

/// How a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    EndOfStream,
    Interrupted,
}

/// Bus message reduced to what the runner acts on
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    EndOfStream,
    Error(PipelineError),
    Warning {
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    Info {
        source: Option<String>,
        message: String,
    },
    StateChanged {
        source: Option<String>,
        old: gst::State,
        current: gst::State,
    },
    PropertyChanged {
        source: String,
        property: String,
        value: Option<String>,
    },
    Other,
}

fn source_name(msg: &gst::MessageRef) -> Option<String> {
    msg.src().map(|s| s.path_string().to_string())
}

/// Classify one bus message
pub fn classify(msg: &gst::MessageRef) -> BusEvent {
    use gst::MessageView;

    match msg.view() {
        MessageView::Eos(..) => BusEvent::EndOfStream,
        MessageView::Error(err) => BusEvent::Error(PipelineError::Stream {
            source: source_name(msg),
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        }),
        MessageView::Warning(w) => BusEvent::Warning {
            source: source_name(msg),
            message: w.error().to_string(),
            debug: w.debug().map(|d| d.to_string()),
        },
        MessageView::Info(i) => BusEvent::Info {
            source: source_name(msg),
            message: i.error().to_string(),
        },
        MessageView::StateChanged(s) => BusEvent::StateChanged {
            source: source_name(msg),
            old: s.old(),
            current: s.current(),
        },
        MessageView::PropertyNotify(p) => {
            let (object, property, value) = p.get();
            BusEvent::PropertyChanged {
                source: object.path_string().to_string(),
                property: property.to_string(),
                value: value.map(|v| format!("{:?}", v)),
            }
        }
        _ => BusEvent::Other,
    }
}

/// Drives an assembled pipeline to completion
pub struct PipelineRunner {
    assembled: AssembledPipeline,
    state: PipelineState,
    verbose: bool,
    interrupt: Arc<AtomicBool>,
}

impl PipelineRunner {
    pub fn new(assembled: AssembledPipeline, verbose: bool, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            assembled,
            state: PipelineState::Null,
            verbose,
            interrupt,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Start streaming and block until end-of-stream, interruption or error
    ///
    /// The pipeline is back in Null and every filter thread has exited when
    /// this returns, whatever the outcome.
    pub fn run(mut self) -> PipelineResult<RunOutcome> {
        if self.verbose {
            let _watch = self
                .assembled
                .pipeline
                .add_property_deep_notify_watch(None, true);
        }

        let result = self
            .transition_to(PipelineState::Playing)
            .and_then(|_| self.poll_bus());
        let shutdown = self.shutdown();

        match (result, shutdown) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), shutdown) => {
                if let Err(shutdown_err) = shutdown {
                    warn!(error = %shutdown_err, "Shutdown after failure was not clean");
                }
                Err(e)
            }
        }
    }

    fn transition_to(&mut self, target: PipelineState) -> PipelineResult<()> {
        for (from, to) in PipelineState::path(self.state, target) {
            debug!(from = %from, to = %to, "Changing pipeline state");
            if let Err(e) = self.assembled.pipeline.set_state(to.to_gst()) {
                let err = self.pending_error().unwrap_or_else(|| PipelineError::Stream {
                    source: Some(self.assembled.pipeline.name().to_string()),
                    message: format!("state change {} -> {} failed: {}", from, to, e),
                    debug: None,
                });
                self.force_null();
                return Err(err);
            }

            let timeout = gst::ClockTime::from_nseconds(STATE_CHANGE_TIMEOUT.as_nanos() as u64);
            let (result, current, pending) = self.assembled.pipeline.state(timeout);
            match result {
                Ok(gst::StateChangeSuccess::Async) => {
                    debug!(current = ?current, pending = ?pending, "State change still in progress");
                }
                Ok(_) => {}
                Err(e) => {
                    let err = self.pending_error().unwrap_or_else(|| PipelineError::Stream {
                        source: Some(self.assembled.pipeline.name().to_string()),
                        message: format!("state change {} -> {} failed: {}", from, to, e),
                        debug: None,
                    });
                    self.force_null();
                    return Err(err);
                }
            }
            self.state = to;
        }
        info!(state = %self.state, "Pipeline state reached");
        Ok(())
    }

    /// Drop straight to Null after a failed step so devices are released
    fn force_null(&mut self) {
        if let Err(e) = self.assembled.pipeline.set_state(gst::State::Null) {
            error!(error = %e, "Pipeline did not reach NULL");
        }
        self.state = PipelineState::Null;
    }

    /// Error already queued on the bus, preferring a branch failure
    fn pending_error(&self) -> Option<PipelineError> {
        if let Some(failure) = self.branch_failure() {
            return Some(failure);
        }
        let bus = self.assembled.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match classify(&msg) {
            BusEvent::Error(e) => Some(e),
            _ => None,
        }
    }

    fn branch_failure(&self) -> Option<PipelineError> {
        self.assembled
            .branch
            .as_ref()
            .and_then(|branch| branch.take_failure())
    }

    fn poll_bus(&mut self) -> PipelineResult<RunOutcome> {
        let bus = self.assembled.pipeline.bus().ok_or_else(|| {
            PipelineError::PipelineBuild("pipeline has no bus".to_string())
        })?;
        let poll = gst::ClockTime::from_nseconds(BUS_POLL_INTERVAL.as_nanos() as u64);

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                info!("Interrupted, stopping pipeline");
                return Ok(RunOutcome::Interrupted);
            }
            let Some(msg) = bus.timed_pop(poll) else {
                continue;
            };

            match classify(&msg) {
                BusEvent::EndOfStream => {
                    info!("End of stream");
                    return Ok(RunOutcome::EndOfStream);
                }
                BusEvent::Error(e) => {
                    let err = self.branch_failure().unwrap_or(e);
                    error!(error = %err, "Pipeline error");
                    return Err(err);
                }
                BusEvent::Warning {
                    source,
                    message,
                    debug: debug_info,
                } => {
                    if self.verbose {
                        warn!(source = ?source, debug = ?debug_info, "{}", message);
                    } else {
                        warn!(source = ?source, "{}", message);
                    }
                }
                BusEvent::Info { source, message } => {
                    info!(source = ?source, "{}", message);
                }
                BusEvent::StateChanged {
                    source,
                    old,
                    current,
                } if self.verbose => {
                    debug!(source = ?source, old = ?old, current = ?current, "State changed");
                }
                BusEvent::PropertyChanged {
                    source,
                    property,
                    value,
                } if self.verbose => {
                    debug!(source = %source, property = %property, value = ?value, "Property changed");
                }
                _ => {}
            }
        }
    }

    /// Cancel the filter threads, step down to Null, then join the threads
    fn shutdown(&mut self) -> PipelineResult<()> {
        if let Some(branch) = self.assembled.branch.as_mut() {
            branch.cancel();
        }
        let result = self.transition_to(PipelineState::Null);
        if let Some(branch) = self.assembled.branch.as_mut() {
            branch.join();
        }
        result
    }
}

/// Build and run the pipeline described by `config`
///
/// Returns once the stream ends, `interrupt` is raised or an error occurs.
pub fn run(config: &PipelineConfig, interrupt: Arc<AtomicBool>) -> PipelineResult<RunOutcome> {
    gst::init()?;

    let capabilities = query_capabilities(config.input_device())?;
    let format = select_best_format(&capabilities, config.desired_format())?;
    info!(
        device = %config.input_device(),
        format = %format,
        "Selected capture format"
    );

    if !config.requested_features().is_empty() {
        info!(
            requested = %config.requested_features(),
            available = %detect_available_features(),
            "Hardware acceleration requested"
        );
    }

    let graph = build_graph(config, &format, &GstRegistry)?;
    let assembled = assemble(&graph, config, &format)?;
    PipelineRunner::new(assembled, config.verbose(), interrupt).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_upwards_steps_through_every_state() {
        assert_eq!(
            PipelineState::path(PipelineState::Null, PipelineState::Playing),
            vec![
                (PipelineState::Null, PipelineState::Ready),
                (PipelineState::Ready, PipelineState::Paused),
                (PipelineState::Paused, PipelineState::Playing),
            ]
        );
    }

    #[test]
    fn test_path_downwards_is_reversed() {
        assert_eq!(
            PipelineState::path(PipelineState::Playing, PipelineState::Ready),
            vec![
                (PipelineState::Playing, PipelineState::Paused),
                (PipelineState::Paused, PipelineState::Ready),
            ]
        );
    }

    #[test]
    fn test_path_to_same_state_is_empty() {
        assert!(PipelineState::path(PipelineState::Paused, PipelineState::Paused).is_empty());
    }

    #[test]
    fn test_classify_error_message() {
        gst::init().unwrap();
        let msg = gst::message::Error::builder(gst::CoreError::Failed, "boom").build();
        match classify(&msg) {
            BusEvent::Error(PipelineError::Stream { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Source that cannot start because its file is missing
    fn unopenable_source() -> gst::Element {
        gst::ElementFactory::make("filesrc")
            .property("location", "/nonexistent/webcam-filters/input")
            .build()
            .unwrap()
    }

    fn runner_for(pipeline: gst::Pipeline) -> PipelineRunner {
        let assembled = AssembledPipeline {
            pipeline,
            branch: None,
        };
        PipelineRunner::new(assembled, false, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_failed_step_leaves_pipeline_in_null() {
        gst::init().unwrap();
        let pipeline = gst::Pipeline::new();
        let fakesink = gst::ElementFactory::make("fakesink").build().unwrap();
        pipeline.add_many([&unopenable_source(), &fakesink]).unwrap();
        let mut runner = runner_for(pipeline.clone());

        assert!(runner.transition_to(PipelineState::Playing).is_err());
        assert_eq!(runner.state(), PipelineState::Null);
        assert_eq!(pipeline.current_state(), gst::State::Null);
        assert_eq!(fakesink.current_state(), gst::State::Null);
    }

    #[test]
    fn test_shutdown_from_playing_reaches_null() {
        gst::init().unwrap();
        let pipeline = gst::Pipeline::new();
        let src = gst::ElementFactory::make("fakesrc")
            .property("is-live", true)
            .build()
            .unwrap();
        let sink = gst::ElementFactory::make("fakesink").build().unwrap();
        pipeline.add_many([&src, &sink]).unwrap();
        src.link(&sink).unwrap();
        let mut runner = runner_for(pipeline.clone());

        runner.transition_to(PipelineState::Playing).unwrap();
        assert_eq!(runner.state(), PipelineState::Playing);
        runner.shutdown().unwrap();
        assert_eq!(runner.state(), PipelineState::Null);
        assert_eq!(pipeline.current_state(), gst::State::Null);
    }

    #[test]
    fn test_classify_eos() {
        gst::init().unwrap();
        let msg = gst::message::Eos::new();
        assert_eq!(classify(&msg), BusEvent::EndOfStream);
    }
}
