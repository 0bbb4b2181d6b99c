// SPDX-License-Identifier: GPL-3.0-only

//! Lowering of a [`Graph`] into a GStreamer pipeline
//!
//! Host nodes become elements. The in-process filter branch is bridged with
//! an `appsink` tap in front of the splitter and a blocking `appsrc` after
//! the compositor, so back-pressure from the filters reaches the camera.
//! Without filtering the splitter lowers to a plain `tee`.

use super::graph::{ElementSpec, Graph, Node, NodeKind, Placement, PropertyValue};
use crate::config::PipelineConfig;
use crate::constants::pipeline::{
    APPSRC_MAX_FRAMES, OUTPUT_FORMAT, PROCESSING_FORMAT, SINK_THROTTLE_TIME_NS,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::filters::frame::BYTES_PER_PIXEL;
use crate::filters::{
    BoxBlur, BranchSpec, FailureSlot, FilterBranch, FrameBuffer, FrameSink, Segmenter, SinkFlow,
    Splitter, WhereCompositor, load_model,
};
use crate::media::formats::FixedFormat;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Built pipeline plus the worker threads it depends on
pub struct AssembledPipeline {
    pub pipeline: gst::Pipeline,
    pub branch: Option<FilterBranch>,
}

/// First and last element of a lowered node
struct Lowered {
    entry: gst::Element,
    exit: gst::Element,
    /// `exit` exposes its source pad only once streaming starts
    dynamic: bool,
}

/// Create the elements for every node, link them and start the filter branch
///
/// Nothing is started on failure; the returned pipeline is in the Null state.
pub fn assemble(
    graph: &Graph,
    config: &PipelineConfig,
    format: &FixedFormat,
) -> PipelineResult<AssembledPipeline> {
    gst::init()?;
    let pipeline = gst::Pipeline::with_name("webcam-filters");

    let mut lowered: HashMap<usize, Lowered> = HashMap::new();
    for node in graph.nodes().iter().filter(|n| n.placement == Placement::Host) {
        let elements = lower_node(node, format)?;
        for element in &elements {
            pipeline.add(element)?;
        }
        gst::Element::link_many(&elements).map_err(|_| {
            PipelineError::PipelineBuild(format!("failed to link elements of '{}'", node.name))
        })?;
        let (Some(entry), Some(exit)) = (elements.first(), elements.last()) else {
            return Err(PipelineError::PipelineBuild(format!(
                "node '{}' lowered to no elements",
                node.name
            )));
        };
        let dynamic = exit
            .factory()
            .is_some_and(|factory| factory.name() == "decodebin");
        lowered.insert(
            node.id,
            Lowered {
                entry: entry.clone(),
                exit: exit.clone(),
                dynamic,
            },
        );
    }

    let mut tap: Option<gst_app::AppSink> = None;
    let mut feed: Option<gst_app::AppSrc> = None;
    for edge in graph.edges() {
        let (Some(from), Some(to)) = (graph.node(edge.from), graph.node(edge.to)) else {
            continue;
        };
        match (from.placement, to.placement) {
            (Placement::Host, Placement::Host) => {
                let (Some(upstream), Some(downstream)) =
                    (lowered.get(&from.id), lowered.get(&to.id))
                else {
                    continue;
                };
                link_nodes(upstream, &downstream.entry, from, to)?;
            }
            (Placement::Host, Placement::InProcess) => {
                let upstream = lowered.get(&from.id).ok_or_else(|| missing(from))?;
                let appsink = make_tap();
                pipeline.add(&appsink)?;
                link_nodes(upstream, appsink.upcast_ref(), from, to)?;
                tap = Some(appsink);
            }
            (Placement::InProcess, Placement::Host) => {
                let downstream = lowered.get(&to.id).ok_or_else(|| missing(to))?;
                let appsrc = make_feed(format)?;
                pipeline.add(&appsrc)?;
                appsrc.link(&downstream.entry).map_err(|_| {
                    PipelineError::PipelineBuild(format!(
                        "failed to link filter output to '{}'",
                        to.name
                    ))
                })?;
                feed = Some(appsrc);
            }
            (Placement::InProcess, Placement::InProcess) => {}
        }
    }

    let branch = match (tap, feed) {
        (Some(tap), Some(feed)) => Some(start_branch(graph, config, format, tap, feed)?),
        (None, None) => None,
        _ => {
            return Err(PipelineError::PipelineBuild(
                "filter branch must have exactly one input and one output".to_string(),
            ));
        }
    };

    info!(
        elements = pipeline.children().len(),
        filtering = branch.is_some(),
        "Assembled pipeline"
    );
    debug!(graph = %graph, "Pipeline topology");
    Ok(AssembledPipeline { pipeline, branch })
}

fn missing(node: &Node) -> PipelineError {
    PipelineError::PipelineBuild(format!("node '{}' was not lowered", node.name))
}

fn make_element(spec: &ElementSpec, name: String) -> PipelineResult<gst::Element> {
    let element = gst::ElementFactory::make(spec.factory)
        .name(name)
        .build()
        .map_err(|e| {
            PipelineError::PipelineBuild(format!("failed to create {}: {}", spec.factory, e))
        })?;
    for (property, value) in &spec.properties {
        match value {
            PropertyValue::Str(v) => element.set_property(property, v.as_str()),
            PropertyValue::Bool(v) => element.set_property(property, *v),
            PropertyValue::UInt(v) => element.set_property(property, *v),
            PropertyValue::UInt64(v) => element.set_property(property, *v),
        }
    }
    Ok(element)
}

fn make_capsfilter(name: &str, caps: &gst::Caps) -> PipelineResult<gst::Element> {
    gst::ElementFactory::make("capsfilter")
        .name(name)
        .property("caps", caps)
        .build()
        .map_err(|e| PipelineError::PipelineBuild(format!("failed to create capsfilter: {}", e)))
}

fn raw_caps(format: &str) -> gst::Caps {
    gst::Caps::builder("video/x-raw").field("format", format).build()
}

/// Element chain for one host node, upstream first
fn lower_node(node: &Node, format: &FixedFormat) -> PipelineResult<Vec<gst::Element>> {
    let single = |spec: ElementSpec| make_element(&spec, node.name.to_string()).map(|e| vec![e]);
    match &node.kind {
        NodeKind::Source { device } => single(
            ElementSpec::new("v4l2src").property("device", PropertyValue::Str(device.clone())),
        ),
        NodeKind::InputFilter { format: fixed } => {
            Ok(vec![make_capsfilter(node.name, &fixed.to_caps())?])
        }
        NodeKind::RgbFilter => Ok(vec![make_capsfilter(node.name, &raw_caps(PROCESSING_FORMAT))?]),
        NodeKind::OutputFilter => Ok(vec![make_capsfilter(node.name, &raw_caps(OUTPUT_FORMAT))?]),
        NodeKind::Decoder(stage) | NodeKind::InputConvert(stage) | NodeKind::OutputConvert(stage) => {
            stage
                .elements()
                .iter()
                .enumerate()
                .map(|(i, spec)| make_element(spec, format!("{}_{}", node.name, i)))
                .collect()
        }
        NodeKind::Splitter => single(ElementSpec::new("tee")),
        NodeKind::Sink { device } => single(
            ElementSpec::new("v4l2sink")
                .property("device", PropertyValue::Str(device.clone()))
                .property("throttle-time", PropertyValue::UInt64(SINK_THROTTLE_TIME_NS))
                .property("qos", PropertyValue::Bool(true)),
        ),
        NodeKind::Queue { .. }
        | NodeKind::Segmentation { .. }
        | NodeKind::BoxBlur { .. }
        | NodeKind::Compositor => Err(PipelineError::PipelineBuild(format!(
            "'{}' ({}) has no element form for {}",
            node.name,
            node.kind.label(),
            format
        ))),
    }
}

/// Link `upstream`'s exit to `downstream`, deferring for dynamic pads
fn link_nodes(
    upstream: &Lowered,
    downstream: &gst::Element,
    from: &Node,
    to: &Node,
) -> PipelineResult<()> {
    if !upstream.dynamic {
        return upstream.exit.link(downstream).map_err(|_| {
            PipelineError::PipelineBuild(format!("failed to link '{}' to '{}'", from.name, to.name))
        });
    }

    let downstream = downstream.downgrade();
    let next_node = to.name;
    upstream.exit.connect_pad_added(move |element, src_pad| {
        let Some(downstream) = downstream.upgrade() else {
            return;
        };
        let Some(sink_pad) = downstream.static_pad("sink") else {
            return;
        };
        if sink_pad.is_linked() {
            return;
        }
        let is_video = src_pad
            .current_caps()
            .and_then(|caps| {
                caps.structure(0)
                    .map(|s| s.name().starts_with("video/"))
            })
            .unwrap_or(false);
        if !is_video {
            debug!(element = %element.name(), pad = %src_pad.name(), "Ignoring non-video pad");
            return;
        }
        match src_pad.link(&sink_pad) {
            Ok(_) => debug!(element = %element.name(), next = next_node, "Linked decoded output"),
            Err(e) => error!(
                element = %element.name(),
                next = next_node,
                error = ?e,
                "Failed to link decoded output"
            ),
        }
    });
    Ok(())
}

fn make_tap() -> gst_app::AppSink {
    gst_app::AppSink::builder()
        .name("filter_tap")
        .caps(&raw_caps(PROCESSING_FORMAT))
        .sync(false)
        .max_buffers(1)
        .drop(false)
        .build()
}

fn make_feed(format: &FixedFormat) -> PipelineResult<gst_app::AppSrc> {
    let info = rgb_info(format)?;
    let caps = info.to_caps().map_err(|e| {
        PipelineError::PipelineBuild(format!("failed to build filter output caps: {}", e))
    })?;
    let appsrc = gst_app::AppSrc::builder()
        .name("filter_source")
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .block(true)
        .max_bytes(APPSRC_MAX_FRAMES * info.size() as u64)
        .build();
    Ok(appsrc)
}

/// Packed RGB layout of the composited frames, at the negotiated rate
fn rgb_info(format: &FixedFormat) -> PipelineResult<gst_video::VideoInfo> {
    gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, format.width, format.height)
        .fps(format.framerate.as_gst_fraction())
        .build()
        .map_err(|e| PipelineError::PipelineBuild(format!("invalid RGB geometry: {}", e)))
}

/// Spawn the filter threads and connect them to the tap and feed elements
fn start_branch(
    graph: &Graph,
    config: &PipelineConfig,
    format: &FixedFormat,
    tap: gst_app::AppSink,
    feed: gst_app::AppSrc,
) -> PipelineResult<FilterBranch> {
    let mut segmentation = None;
    let mut kernel = None;
    let mut queue_depth = None;
    for node in graph.nodes() {
        match &node.kind {
            NodeKind::Segmentation { model, threshold } => segmentation = Some((*model, *threshold)),
            NodeKind::BoxBlur { kernel: k } => kernel = Some(*k),
            NodeKind::Queue { depth } if node.name == "segmentation_queue" => {
                queue_depth = Some(*depth)
            }
            _ => {}
        }
    }
    let (Some((model_kind, threshold)), Some(kernel), Some(queue_depth)) =
        (segmentation, kernel, queue_depth)
    else {
        return Err(PipelineError::PipelineBuild(
            "filter branch is missing segmentation, blur or its queue".to_string(),
        ));
    };

    let model = load_model(model_kind, &config.model_path())?;
    let mut compositor = WhereCompositor::new(format.width, format.height);
    if let Some(period) = format.framerate.frame_period_ns() {
        compositor = compositor.with_timestamp_tolerance(period);
    }

    let segmenter = Segmenter::new(model, threshold);
    let blur = BoxBlur::new(kernel)?;
    info!(
        model = %model_kind,
        threshold = segmenter.threshold(),
        kernel = blur.kernel(),
        "Configured filter branch"
    );

    let spec = BranchSpec {
        segmenter,
        blur,
        compositor,
        sink: Box::new(AppSrcSink::new(feed.clone(), format)?),
        queue_depth,
    };

    let feed_ref = feed.downgrade();
    let failure = FailureSlot::new(move |err| {
        let Some(feed) = feed_ref.upgrade() else {
            return;
        };
        let message = gst::message::Error::builder(gst::CoreError::Failed, &err.to_string())
            .src(&feed)
            .build();
        if feed.post_message(message).is_err() {
            error!(error = %err, "Failed to post filter failure on the bus");
        }
    });

    let (branch, splitter) = FilterBranch::spawn(spec, failure)?;
    install_tap(&tap, splitter);
    Ok(branch)
}

fn install_tap(tap: &gst_app::AppSink, splitter: Splitter) {
    let splitter = Arc::new(Mutex::new(Some(splitter)));
    let eos_splitter = splitter.clone();

    tap.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |appsink| {
                let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let frame = frame_from_sample(&sample).map_err(|e| {
                    error!(error = %e, "Failed to read captured frame");
                    gst::FlowError::Error
                })?;
                let guard = splitter.lock().unwrap_or_else(|e| e.into_inner());
                match guard.as_ref().map(|s| s.push(frame)) {
                    Some(SinkFlow::Continue) => Ok(gst::FlowSuccess::Ok),
                    Some(SinkFlow::Stop) => Err(gst::FlowError::Flushing),
                    None => Err(gst::FlowError::Eos),
                }
            })
            .eos(move |_| {
                // Dropping the splitter ends every branch input
                let ended = eos_splitter.lock().unwrap_or_else(|e| e.into_inner()).take();
                if ended.is_some() {
                    debug!("Capture reached end of stream, draining filter branch");
                }
            })
            .build(),
    );
}

/// Copy `height` rows of `row_len` bytes out of a strided plane
fn unpack_rows(plane: &[u8], stride: usize, row_len: usize, height: usize) -> Option<Vec<u8>> {
    let mut data = Vec::with_capacity(row_len * height);
    for row in 0..height {
        let start = row * stride;
        data.extend_from_slice(plane.get(start..start + row_len)?);
    }
    Some(data)
}

/// Copy tightly packed rows into a strided plane
fn pack_rows(packed: &[u8], plane: &mut [u8], stride: usize, row_len: usize) -> Option<()> {
    for (row, line) in packed.chunks_exact(row_len).enumerate() {
        let start = row * stride;
        plane.get_mut(start..start + row_len)?.copy_from_slice(line);
    }
    Some(())
}

fn frame_from_sample(sample: &gst::Sample) -> PipelineResult<FrameBuffer> {
    let caps = sample
        .caps()
        .ok_or_else(|| PipelineError::element("filter_tap", "sample without caps"))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| PipelineError::element("filter_tap", "sample without buffer"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| PipelineError::element("filter_tap", e.to_string()))?;
    if info.format() != gst_video::VideoFormat::Rgb {
        return Err(PipelineError::element(
            "filter_tap",
            format!("expected RGB frames, got {:?}", info.format()),
        ));
    }

    let map = buffer
        .map_readable()
        .map_err(|e| PipelineError::element("filter_tap", e.to_string()))?;
    let (width, height) = (info.width(), info.height());
    let row_len = width as usize * BYTES_PER_PIXEL;
    let data = unpack_rows(
        map.as_slice(),
        info.stride()[0] as usize,
        row_len,
        height as usize,
    )
    .ok_or_else(|| {
        PipelineError::BufferGeometryMismatch(format!(
            "buffer of {} bytes too small for {}x{} RGB",
            map.size(),
            width,
            height
        ))
    })?;

    let mut frame = FrameBuffer::from_data(width, height, data)?;
    frame.pts = buffer.pts().map(|t| t.nseconds());
    frame.dts = buffer.dts().map(|t| t.nseconds());
    frame.duration = buffer.duration().map(|t| t.nseconds());
    Ok(frame)
}

/// Pushes composited frames into the pipeline through `appsrc`
struct AppSrcSink {
    appsrc: gst_app::AppSrc,
    info: gst_video::VideoInfo,
}

impl AppSrcSink {
    fn new(appsrc: gst_app::AppSrc, format: &FixedFormat) -> PipelineResult<Self> {
        Ok(Self {
            appsrc,
            info: rgb_info(format)?,
        })
    }
}

impl FrameSink for AppSrcSink {
    fn push_frame(&mut self, frame: &FrameBuffer) -> PipelineResult<SinkFlow> {
        let to_error = |e: &dyn std::fmt::Display| PipelineError::element("filter_source", e.to_string());

        let mut buffer = gst::Buffer::with_size(self.info.size()).map_err(|e| to_error(&e))?;
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| to_error(&"new buffer is not writable"))?;
            buffer.set_pts(frame.pts.map(gst::ClockTime::from_nseconds));
            buffer.set_dts(frame.dts.map(gst::ClockTime::from_nseconds));
            buffer.set_duration(frame.duration.map(gst::ClockTime::from_nseconds));

            let mut map = buffer.map_writable().map_err(|e| to_error(&e))?;
            pack_rows(
                frame.data(),
                map.as_mut_slice(),
                self.info.stride()[0] as usize,
                frame.stride(),
            )
            .ok_or_else(|| {
                PipelineError::BufferGeometryMismatch(format!(
                    "{}x{} frame does not fit the {}x{} output",
                    frame.width(),
                    frame.height(),
                    self.info.width(),
                    self.info.height()
                ))
            })?;
        }

        match self.appsrc.push_buffer(buffer) {
            Ok(_) => Ok(SinkFlow::Continue),
            Err(gst::FlowError::Flushing) | Err(gst::FlowError::Eos) => Ok(SinkFlow::Stop),
            Err(e) => Err(to_error(&format!("push failed: {:?}", e))),
        }
    }

    fn end_of_stream(&mut self) -> PipelineResult<()> {
        match self.appsrc.end_of_stream() {
            Ok(_) | Err(gst::FlowError::Flushing) => Ok(()),
            Err(e) => Err(PipelineError::element(
                "filter_source",
                format!("end of stream failed: {:?}", e),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_rows_skips_padding() {
        // 1x2 RGB plane with a stride of 4
        let plane = [1, 2, 3, 0, 4, 5, 6, 0];
        assert_eq!(unpack_rows(&plane, 4, 3, 2), Some(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_unpack_rows_rejects_short_plane() {
        assert_eq!(unpack_rows(&[0; 6], 4, 3, 2), None);
    }

    #[test]
    fn test_pack_rows_writes_into_stride() {
        let mut plane = [9u8; 8];
        assert_eq!(pack_rows(&[1, 2, 3, 4, 5, 6], &mut plane, 4, 3), Some(()));
        assert_eq!(plane, [1, 2, 3, 9, 4, 5, 6, 9]);
    }

    fn ntsc_format() -> FixedFormat {
        FixedFormat {
            media_type: "video/x-raw".to_string(),
            format: Some("YUY2".to_string()),
            width: 640,
            height: 480,
            framerate: crate::media::Framerate::new(30000, 1001),
        }
    }

    #[test]
    fn test_feed_caps_carry_negotiated_framerate() {
        gst::init().unwrap();
        let appsrc = make_feed(&ntsc_format()).unwrap();
        let caps = appsrc.caps().unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(
            s.get::<gst::Fraction>("framerate").unwrap(),
            gst::Fraction::new(30000, 1001)
        );
        assert_eq!(s.get::<i32>("width").unwrap(), 640);
        assert_eq!(s.get::<&str>("format").unwrap(), "RGB");
    }

    #[test]
    fn test_rgb_info_carries_rate() {
        gst::init().unwrap();
        let info = rgb_info(&ntsc_format()).unwrap();
        assert_eq!(info.fps(), gst::Fraction::new(30000, 1001));
        assert!(info.size() >= 640 * 480 * 3);
    }
}
