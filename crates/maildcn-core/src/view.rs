//! View composition
//!
//! Side-effect-free projections of monitor state into display structures.

use crate::buffer::{EventBuffers, EventRef};
use crate::channel::ConnectionStatus;
use crate::graph::{Edge, ProtocolGraph, ProtocolNode};
use crate::story::{Playback, PlaybackState, StoryStep, STORY};
use maildcn_common::types::ProtocolKind;
use serde::Serialize;
use std::time::Duration;

/// The detail area shows exactly one of these
#[derive(Debug, Clone)]
pub enum DetailPanel<'a> {
    /// A node was selected explicitly
    Protocol {
        node: &'a ProtocolNode,
        events: Vec<EventRef>,
    },
    /// Playback is running or paused
    Step {
        step: &'static StoryStep,
        index: usize,
        total: usize,
    },
    /// Fallback
    Overview(SystemOverview),
}

/// Whole-system statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemOverview {
    pub total_processes: usize,
    pub active_protocols: usize,
    pub protocols: Vec<ProtocolStat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolStat {
    pub id: &'static str,
    pub name: &'static str,
    pub count: usize,
    pub active: bool,
}

/// Selection precedence: explicit node, then playback step, then overview
pub fn detail_panel<'a>(
    graph: &'a ProtocolGraph,
    buffers: &EventBuffers,
    playback: &Playback,
    selected: Option<&str>,
) -> DetailPanel<'a> {
    if let Some(node) = selected.and_then(|id| graph.node(id)) {
        return DetailPanel::Protocol {
            node,
            events: buffers.history_for(node.id()),
        };
    }

    if playback.is_started() {
        let (index, total) = playback.progress();
        return DetailPanel::Step {
            step: playback.current_step(),
            index,
            total,
        };
    }

    DetailPanel::Overview(overview(graph, buffers))
}

pub fn overview(graph: &ProtocolGraph, buffers: &EventBuffers) -> SystemOverview {
    let counts = buffers.protocol_counts();
    SystemOverview {
        total_processes: buffers.history().len(),
        active_protocols: graph.active_count(),
        protocols: graph
            .nodes()
            .iter()
            .map(|node| ProtocolStat {
                id: node.id(),
                name: node.name(),
                count: counts.get(node.id()).copied().unwrap_or(0),
                active: node.is_active(),
            })
            .collect(),
    }
}

/// An edge and whether it touches the node of the step being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EdgeView {
    #[serde(flatten)]
    pub edge: Edge,
    pub highlighted: bool,
}

pub fn edges(graph: &ProtocolGraph, playback: &Playback) -> Vec<EdgeView> {
    let focus = playback
        .is_playing()
        .then(|| playback.current_step().node_id);
    graph
        .edges()
        .into_iter()
        .map(|edge| EdgeView {
            highlighted: focus.is_some_and(|id| edge.from == id || edge.to == id),
            edge,
        })
        .collect()
}

/// Data-flow animation from the current step's node to its successor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowAnimation {
    pub from: &'static str,
    pub to: &'static str,
    pub color: &'static str,
    pub duration: Duration,
}

pub fn flow(graph: &ProtocolGraph, playback: &Playback) -> Option<FlowAnimation> {
    if !playback.is_playing() {
        return None;
    }
    let step = playback.current_step();
    let node = graph.node(step.node_id)?;
    let next = graph.next_of(step.node_id)?;
    Some(FlowAnimation {
        from: node.id(),
        to: next.id(),
        color: node.color(),
        duration: step.animation,
    })
}

/// Owned event line for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub protocol: String,
    pub kind: ProtocolKind,
    pub stage: String,
    pub details: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl EventSummary {
    pub fn from_event(event: &EventRef, with_data: bool) -> Self {
        Self {
            protocol: event.protocol.clone(),
            kind: event.kind(),
            stage: event.stage.clone(),
            details: event.details.clone(),
            time: event.display_time(),
            data: if with_data { event.data_pretty() } else { None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub id: &'static str,
    pub name: &'static str,
    pub color: &'static str,
    pub active: bool,
    pub events: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackView {
    pub state: PlaybackState,
    pub step: usize,
    pub total: usize,
    pub title: &'static str,
    pub explanation_visible: bool,
}

/// Owned rendering of [`DetailPanel`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "panel", rename_all = "snake_case")]
pub enum PanelView {
    Protocol {
        id: &'static str,
        name: &'static str,
        description: &'static str,
        total: usize,
        events: Vec<EventSummary>,
    },
    Step {
        index: usize,
        total: usize,
        title: &'static str,
        subtitle: &'static str,
        explanation: &'static str,
    },
    Overview(SystemOverview),
}

impl PanelView {
    pub fn from_panel(panel: &DetailPanel<'_>, with_data: bool) -> Self {
        match panel {
            DetailPanel::Protocol { node, events } => PanelView::Protocol {
                id: node.id(),
                name: node.name(),
                description: node.description(),
                total: events.len(),
                events: events
                    .iter()
                    .map(|e| EventSummary::from_event(e, with_data))
                    .collect(),
            },
            DetailPanel::Step { step, index, total } => PanelView::Step {
                index: *index,
                total: *total,
                title: step.title,
                subtitle: step.subtitle,
                explanation: step.explanation,
            },
            DetailPanel::Overview(overview) => PanelView::Overview(overview.clone()),
        }
    }
}

/// Point-in-time summary published to renderers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub connection: ConnectionStatus,
    pub playback: PlaybackView,
    pub speed: f64,
    pub live: usize,
    pub history: usize,
    pub pending_recent: usize,
    /// Events ever moved into `recent`, so renderers can tell repeats apart
    pub recent_total: u64,
    pub recent: Vec<EventSummary>,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    pub panel: PanelView,
    pub notices: Vec<String>,
    /// Notices ever raised
    pub notices_total: u64,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        let step = &STORY[0];
        Self {
            connection: ConnectionStatus::Disconnected,
            playback: PlaybackView {
                state: PlaybackState::Idle,
                step: 1,
                total: STORY.len(),
                title: step.title,
                explanation_visible: true,
            },
            speed: 1.0,
            live: 0,
            history: 0,
            pending_recent: 0,
            recent_total: 0,
            recent: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            panel: PanelView::Overview(SystemOverview {
                total_processes: 0,
                active_protocols: 0,
                protocols: Vec::new(),
            }),
            notices: Vec::new(),
            notices_total: 0,
        }
    }
}
