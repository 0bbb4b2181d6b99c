// SPDX-License-Identifier: GPL-3.0-only

//! Typed processing graph
//!
//! [`build_graph`] is a pure function of the configuration, the negotiated
//! format and an [`ElementRegistry`]. It decides the topology once:
//!
//! ```text
//! source → input_filter → decoder → input_convert → rgb_filter → splitter ─┐
//!                                                                           │
//!   blur == 0:  splitter ───────────────────────────────────────────────────┤
//!                                                                           │
//!   blur > 0:   splitter ─┬─ queue → segmentation ── condition ─┐           │
//!                         ├─ queue → box_blur ────── y ─────────┼─ where ───┤
//!                         └─ queue ───────────────── x ─────────┘           │
//!                                                                           ▼
//!                                      output_convert → output_filter → sink
//! ```
//!
//! Nodes of the filtering branch only exist when blur is enabled; they are
//! never built and bypassed. Decode and convert stages are chosen once per
//! feature bit between a software and an accelerated [`Stage`].

use crate::config::{HwFallbackPolicy, PipelineConfig, SegmentationModelKind};
use crate::constants::pipeline::{BRANCH_QUEUE_DEPTH, COMPOSITOR_SLOT_DEPTH, videoconvert_threads};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::FixedFormat;
use crate::media::hwaccel::{VaapiFeatures, element_candidates, parser_for};
use std::fmt;
use tracing::{info, warn};

pub type NodeId = usize;

/// Where a node executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// GStreamer element(s)
    Host,
    /// Rust worker thread of the filter branch
    InProcess,
}

/// Compositor input an edge feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorPad {
    Condition,
    X,
    Y,
}

/// Typed GStreamer property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    UInt(u32),
    UInt64(u64),
}

/// One GStreamer element to instantiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    pub factory: &'static str,
    pub properties: Vec<(&'static str, PropertyValue)>,
}

impl ElementSpec {
    pub fn new(factory: &'static str) -> Self {
        Self {
            factory,
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, name: &'static str, value: PropertyValue) -> Self {
        self.properties.push((name, value));
        self
    }
}

/// A decode or convert stage, software or accelerated
pub trait Stage: fmt::Debug + Send + Sync {
    /// Element factory that characterizes the stage
    fn label(&self) -> &'static str;

    fn is_accelerated(&self) -> bool;

    /// Elements to link in order, upstream first
    fn elements(&self) -> Vec<ElementSpec>;
}

/// `decodebin`, which also passes raw video straight through
#[derive(Debug)]
pub struct SoftwareDecode;

impl Stage for SoftwareDecode {
    fn label(&self) -> &'static str {
        "decodebin"
    }

    fn is_accelerated(&self) -> bool {
        false
    }

    fn elements(&self) -> Vec<ElementSpec> {
        vec![ElementSpec::new("decodebin")]
    }
}

#[derive(Debug)]
pub struct AcceleratedDecode {
    pub feature: VaapiFeatures,
    pub parser: Option<&'static str>,
    pub decoder: &'static str,
}

impl Stage for AcceleratedDecode {
    fn label(&self) -> &'static str {
        self.decoder
    }

    fn is_accelerated(&self) -> bool {
        true
    }

    fn elements(&self) -> Vec<ElementSpec> {
        self.parser
            .into_iter()
            .chain(std::iter::once(self.decoder))
            .map(ElementSpec::new)
            .collect()
    }
}

#[derive(Debug)]
pub struct SoftwareConvert;

impl Stage for SoftwareConvert {
    fn label(&self) -> &'static str {
        "videoconvert"
    }

    fn is_accelerated(&self) -> bool {
        false
    }

    fn elements(&self) -> Vec<ElementSpec> {
        vec![
            ElementSpec::new("videoconvert")
                .property("n-threads", PropertyValue::UInt(videoconvert_threads())),
        ]
    }
}

/// VA post-processor next to a software repack on the RGB side
///
/// VA surfaces have no packed 24-bit RGB layout, so `videoconvert` only
/// repacks between RGB and the layout the post-processor hands over.
#[derive(Debug)]
pub struct AcceleratedConvert {
    pub feature: VaapiFeatures,
    pub postproc: &'static str,
}

impl Stage for AcceleratedConvert {
    fn label(&self) -> &'static str {
        self.postproc
    }

    fn is_accelerated(&self) -> bool {
        true
    }

    fn elements(&self) -> Vec<ElementSpec> {
        let postproc = ElementSpec::new(self.postproc);
        let repack = ElementSpec::new("videoconvert");
        if self.feature == VaapiFeatures::CONVERT_OUTPUT {
            vec![repack, postproc]
        } else {
            vec![postproc, repack]
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Source { device: String },
    InputFilter { format: FixedFormat },
    Decoder(Box<dyn Stage>),
    InputConvert(Box<dyn Stage>),
    /// Pins packed RGB for the filters
    RgbFilter,
    Splitter,
    Queue { depth: usize },
    Segmentation {
        model: SegmentationModelKind,
        threshold: f32,
    },
    BoxBlur { kernel: u32 },
    Compositor,
    OutputConvert(Box<dyn Stage>),
    /// Pins the sink pixel format
    OutputFilter,
    Sink { device: String },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Source { .. } => "v4l2src",
            NodeKind::InputFilter { .. } | NodeKind::RgbFilter | NodeKind::OutputFilter => {
                "capsfilter"
            }
            NodeKind::Decoder(stage)
            | NodeKind::InputConvert(stage)
            | NodeKind::OutputConvert(stage) => stage.label(),
            NodeKind::Splitter => "splitter",
            NodeKind::Queue { .. } => "queue",
            NodeKind::Segmentation { .. } => "segmentation",
            NodeKind::BoxBlur { .. } => "box-blur",
            NodeKind::Compositor => "where",
            NodeKind::Sink { .. } => "v4l2sink",
        }
    }

    /// The software/accelerated stage of decode and convert nodes
    pub fn stage(&self) -> Option<&dyn Stage> {
        match self {
            NodeKind::Decoder(stage)
            | NodeKind::InputConvert(stage)
            | NodeKind::OutputConvert(stage) => Some(stage.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: &'static str,
    pub kind: NodeKind,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub pad: Option<CompositorPad>,
}

/// Immutable node/edge description of one pipeline run
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    fallbacks: VaapiFeatures,
}

impl Graph {
    fn add(&mut self, name: &'static str, kind: NodeKind, placement: Placement) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            name,
            kind,
            placement,
        });
        id
    }

    fn chain(&mut self, ids: &[NodeId]) {
        for pair in ids.windows(2) {
            self.connect(pair[0], pair[1], None);
        }
    }

    fn connect(&mut self, from: NodeId, to: NodeId, pad: Option<CompositorPad>) {
        self.edges.push(Edge { from, to, pad });
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// First node with the given name
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.edges
            .iter()
            .filter(move |edge| edge.from == id)
            .filter_map(|edge| self.node(edge.to))
    }

    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.edges
            .iter()
            .filter(move |edge| edge.to == id)
            .filter_map(|edge| self.node(edge.from))
    }

    /// Whether the segmentation/blur/compositor branch is present
    pub fn has_filter_branch(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| node.placement == Placement::InProcess)
    }

    /// Requested acceleration features that fell back to software
    pub fn fallbacks(&self) -> VaapiFeatures {
        self.fallbacks
    }
}

impl fmt::Display for Graph {
    /// One edge per line, `from[label] -> to[label]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for edge in &self.edges {
            let (Some(from), Some(to)) = (self.node(edge.from), self.node(edge.to)) else {
                continue;
            };
            write!(
                f,
                "{}[{}] -> {}[{}]",
                from.name,
                from.kind.label(),
                to.name,
                to.kind.label()
            )?;
            if let Some(pad) = edge.pad {
                write!(f, " ({:?})", pad)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Lookup of installed element factories
pub trait ElementRegistry {
    fn has_element(&self, factory: &str) -> bool;
}

/// Registry backed by the GStreamer plugin registry
#[derive(Debug, Clone, Copy, Default)]
pub struct GstRegistry;

impl ElementRegistry for GstRegistry {
    fn has_element(&self, factory: &str) -> bool {
        gstreamer::ElementFactory::find(factory).is_some()
    }
}

impl<F: Fn(&str) -> bool> ElementRegistry for F {
    fn has_element(&self, factory: &str) -> bool {
        self(factory)
    }
}

/// Software elements every pipeline needs
const REQUIRED_ELEMENTS: &[&str] = &["v4l2src", "capsfilter", "videoconvert", "v4l2sink"];

struct StageSelector<'a> {
    requested: VaapiFeatures,
    policy: HwFallbackPolicy,
    registry: &'a dyn ElementRegistry,
    fallbacks: VaapiFeatures,
}

impl StageSelector<'_> {
    fn first_available(&self, feature: VaapiFeatures) -> Option<&'static str> {
        element_candidates(feature)
            .iter()
            .copied()
            .find(|name| self.registry.has_element(name))
    }

    fn fall_back(&mut self, feature: VaapiFeatures) -> PipelineResult<()> {
        let name = feature.flag_name().unwrap_or("unknown");
        let candidates = element_candidates(feature).join(", ");
        match self.policy {
            HwFallbackPolicy::Degrade => {
                warn!(
                    feature = name,
                    candidates = %candidates,
                    "Accelerated element unavailable, using software stage"
                );
                self.fallbacks |= feature;
                Ok(())
            }
            HwFallbackPolicy::Fail => Err(PipelineError::PipelineBuild(format!(
                "accelerated feature '{}' requested but none of [{}] is installed",
                name, candidates
            ))),
        }
    }

    fn decoder(&mut self, format: &FixedFormat) -> PipelineResult<Box<dyn Stage>> {
        if format.is_raw() {
            return Ok(Box::new(SoftwareDecode));
        }
        let Some(feature) = VaapiFeatures::decode_feature_for(&format.media_type) else {
            return Ok(Box::new(SoftwareDecode));
        };
        if !self.requested.contains(feature) {
            return Ok(Box::new(SoftwareDecode));
        }

        let parser = parser_for(feature);
        let parser_ok = parser.is_none_or(|p| self.registry.has_element(p));
        match self.first_available(feature) {
            Some(decoder) if parser_ok => Ok(Box::new(AcceleratedDecode {
                feature,
                parser,
                decoder,
            })),
            _ => {
                self.fall_back(feature)?;
                Ok(Box::new(SoftwareDecode))
            }
        }
    }

    fn converter(&mut self, feature: VaapiFeatures) -> PipelineResult<Box<dyn Stage>> {
        if !self.requested.contains(feature) {
            return Ok(Box::new(SoftwareConvert));
        }
        match self.first_available(feature) {
            Some(postproc) => Ok(Box::new(AcceleratedConvert { feature, postproc })),
            None => {
                self.fall_back(feature)?;
                Ok(Box::new(SoftwareConvert))
            }
        }
    }
}

fn require(registry: &dyn ElementRegistry, factories: &[&str]) -> PipelineResult<()> {
    let missing: Vec<&str> = factories
        .iter()
        .copied()
        .filter(|factory| !registry.has_element(factory))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::PipelineBuild(format!(
            "required element(s) not installed: {}",
            missing.join(", ")
        )))
    }
}

/// Build the processing graph for one run
pub fn build_graph(
    config: &PipelineConfig,
    format: &FixedFormat,
    registry: &dyn ElementRegistry,
) -> PipelineResult<Graph> {
    require(registry, REQUIRED_ELEMENTS)?;

    let mut selector = StageSelector {
        requested: config.requested_features(),
        policy: config.hw_fallback(),
        registry,
        fallbacks: VaapiFeatures::empty(),
    };
    let decoder = selector.decoder(format)?;
    let input_convert = selector.converter(VaapiFeatures::CONVERT_INPUT)?;
    let output_convert = selector.converter(VaapiFeatures::CONVERT_OUTPUT)?;

    if !decoder.is_accelerated() {
        require(registry, &["decodebin"])?;
    }
    if config.filtering_enabled() {
        require(registry, &["appsink", "appsrc"])?;
    } else {
        require(registry, &["tee"])?;
    }

    let mut graph = Graph {
        nodes: Vec::new(),
        edges: Vec::new(),
        fallbacks: VaapiFeatures::empty(),
    };
    let source = graph.add(
        "source",
        NodeKind::Source {
            device: config.input_device().to_string(),
        },
        Placement::Host,
    );
    let input_filter = graph.add(
        "input_filter",
        NodeKind::InputFilter {
            format: format.clone(),
        },
        Placement::Host,
    );
    let decode = graph.add("decoder", NodeKind::Decoder(decoder), Placement::Host);
    let convert = graph.add(
        "input_convert",
        NodeKind::InputConvert(input_convert),
        Placement::Host,
    );
    let rgb = graph.add("rgb_filter", NodeKind::RgbFilter, Placement::Host);
    graph.chain(&[source, input_filter, decode, convert, rgb]);

    let branch_output = match config.blur_kernel() {
        Some(kernel) => {
            let splitter = graph.add("splitter", NodeKind::Splitter, Placement::InProcess);
            let seg_queue = graph.add(
                "segmentation_queue",
                NodeKind::Queue {
                    depth: BRANCH_QUEUE_DEPTH,
                },
                Placement::InProcess,
            );
            let segmentation = graph.add(
                "segmentation",
                NodeKind::Segmentation {
                    model: config.segmentation_model(),
                    threshold: config.segmentation_threshold(),
                },
                Placement::InProcess,
            );
            let blur_queue = graph.add(
                "blur_queue",
                NodeKind::Queue {
                    depth: BRANCH_QUEUE_DEPTH,
                },
                Placement::InProcess,
            );
            let blur = graph.add("box_blur", NodeKind::BoxBlur { kernel }, Placement::InProcess);
            let passthrough = graph.add(
                "passthrough_queue",
                NodeKind::Queue {
                    depth: COMPOSITOR_SLOT_DEPTH,
                },
                Placement::InProcess,
            );
            let compositor = graph.add("compositor", NodeKind::Compositor, Placement::InProcess);

            graph.chain(&[rgb, splitter]);
            graph.chain(&[splitter, seg_queue, segmentation]);
            graph.chain(&[splitter, blur_queue, blur]);
            graph.chain(&[splitter, passthrough]);
            graph.connect(segmentation, compositor, Some(CompositorPad::Condition));
            graph.connect(passthrough, compositor, Some(CompositorPad::X));
            graph.connect(blur, compositor, Some(CompositorPad::Y));
            compositor
        }
        None => {
            let splitter = graph.add("splitter", NodeKind::Splitter, Placement::Host);
            graph.chain(&[rgb, splitter]);
            splitter
        }
    };

    let output_convert = graph.add(
        "output_convert",
        NodeKind::OutputConvert(output_convert),
        Placement::Host,
    );
    let output_filter = graph.add("output_filter", NodeKind::OutputFilter, Placement::Host);
    let sink = graph.add(
        "sink",
        NodeKind::Sink {
            device: config.output_device().to_string(),
        },
        Placement::Host,
    );
    graph.chain(&[branch_output, output_convert, output_filter, sink]);
    graph.fallbacks = selector.fallbacks;

    info!(
        nodes = graph.nodes.len(),
        filtering = graph.has_filter_branch(),
        fallbacks = %graph.fallbacks,
        "Built processing graph"
    );
    Ok(graph)
}
