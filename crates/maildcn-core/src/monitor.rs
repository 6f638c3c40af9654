//! Protocol-event aggregator
//!
//! `DcnMonitor` owns every piece of view state and is mutated one event or
//! user action at a time. It performs no I/O; [`crate::service`] drives it.

use crate::buffer::{EventBuffers, EventRef};
use crate::channel::ConnectionStatus;
use crate::graph::ProtocolGraph;
use crate::notice::{NoticeLevel, Notices};
use crate::pacing::Pacer;
use crate::story::Playback;
use crate::view::{
    self, DetailPanel, EdgeView, EventSummary, FlowAnimation, MonitorSnapshot, NodeView,
    PanelView, PlaybackView,
};
use maildcn_common::config::MonitorConfig;
use maildcn_common::types::ProtocolEvent;
use maildcn_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Aggregated monitor state
#[derive(Debug)]
pub struct DcnMonitor {
    buffers: EventBuffers,
    graph: ProtocolGraph,
    playback: Playback,
    pacer: Pacer,
    notices: Notices,
    recent_inserted: u64,
    selected: Option<&'static str>,
    show_details: bool,
    follow_playback: bool,
}

impl DcnMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            buffers: EventBuffers::new(),
            graph: ProtocolGraph::new(),
            playback: Playback::new(),
            pacer: Pacer::new(
                Duration::from_millis(config.recent_delay_ms),
                config.simulation_speed,
            ),
            notices: Notices::new(Duration::from_secs(config.notice_ttl_secs)),
            recent_inserted: 0,
            selected: None,
            show_details: true,
            follow_playback: config.follow_playback,
        }
    }

    /// Fold one delivered event into the views
    pub fn record(&mut self, event: ProtocolEvent, now: Instant) {
        let event: EventRef = Arc::new(event);

        if !self.live_feed_enabled() {
            self.buffers.push_history(event);
            return;
        }

        self.buffers.push(event.clone());
        if !self.graph.record_event(&event) {
            debug!("No node for protocol '{}'", event.protocol);
        }
        self.pacer.schedule(event, now);
    }

    /// Whether live views are currently fed
    pub fn live_feed_enabled(&self) -> bool {
        !self.follow_playback || self.playback.is_playing()
    }

    /// Move due paced events into the recent view. Returns how many moved.
    pub fn tick(&mut self, now: Instant) -> usize {
        let due = self.pacer.drain_due(now);
        let moved = due.len();
        for event in due {
            self.buffers.push_recent(event);
        }
        self.recent_inserted += moved as u64;
        self.notices.prune(now);
        moved
    }

    /// Next paced insertion or notice expiry, whichever comes first
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.pacer.next_due(), self.notices.next_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Empty every buffer and cancel pending paced insertions
    pub fn clear(&mut self) {
        let cancelled = self.pacer.cancel_all();
        self.buffers.clear();
        self.graph.clear();
        info!("Cleared process history ({} pending dropped)", cancelled);
    }

    pub fn start(&mut self) -> bool {
        self.playback.start()
    }

    pub fn pause(&mut self) -> bool {
        self.playback.pause()
    }

    pub fn resume(&mut self) -> bool {
        self.playback.resume()
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.playback.toggle_pause()
    }

    pub fn next(&mut self) {
        self.playback.next();
    }

    pub fn previous(&mut self) -> bool {
        self.playback.previous()
    }

    pub fn hide_explanation(&mut self) {
        self.playback.hide_explanation();
    }

    /// Back to idle, clearing the node selection and node activity
    pub fn reset(&mut self) {
        self.playback.reset();
        self.selected = None;
        self.graph.reset_activity();
    }

    /// Toggle the selected node; selecting the selected node deselects it
    pub fn select_node(&mut self, id: &str) -> Result<Option<&'static str>> {
        let node = self
            .graph
            .node(id)
            .ok_or_else(|| Error::NotFound(format!("protocol node '{}'", id)))?;
        let id = node.id();
        self.selected = if self.selected == Some(id) {
            None
        } else {
            Some(id)
        };
        Ok(self.selected)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&'static str> {
        self.selected
    }

    /// Set the simulation speed; returns the clamped value
    pub fn set_speed(&mut self, speed: f64) -> f64 {
        self.pacer.set_speed(speed)
    }

    pub fn speed(&self) -> f64 {
        self.pacer.speed()
    }

    pub fn toggle_details(&mut self) -> bool {
        self.show_details = !self.show_details;
        self.show_details
    }

    pub fn notify(&mut self, level: NoticeLevel, message: impl Into<String>, now: Instant) {
        self.notices.push(level, message, now);
    }

    pub fn notify_error(&mut self, err: &Error, now: Instant) {
        self.notices.push_error(err, now);
    }

    pub fn buffers(&self) -> &EventBuffers {
        &self.buffers
    }

    pub fn graph(&self) -> &ProtocolGraph {
        &self.graph
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    pub fn pending_recent(&self) -> usize {
        self.pacer.pending()
    }

    pub fn detail_panel(&self) -> DetailPanel<'_> {
        view::detail_panel(&self.graph, &self.buffers, &self.playback, self.selected)
    }

    pub fn edges(&self) -> Vec<EdgeView> {
        view::edges(&self.graph, &self.playback)
    }

    pub fn flow(&self) -> Option<FlowAnimation> {
        view::flow(&self.graph, &self.playback)
    }

    pub fn snapshot(&self, connection: ConnectionStatus, now: Instant) -> MonitorSnapshot {
        let step = self.playback.current_step();
        let (index, total) = self.playback.progress();

        MonitorSnapshot {
            connection,
            playback: PlaybackView {
                state: self.playback.state(),
                step: index,
                total,
                title: step.title,
                explanation_visible: self.playback.explanation_visible(),
            },
            speed: self.speed(),
            live: self.buffers.live().len(),
            history: self.buffers.history().len(),
            pending_recent: self.pacer.pending(),
            recent_total: self.recent_inserted,
            recent: self
                .buffers
                .recent()
                .iter()
                .map(|event| EventSummary::from_event(event, self.show_details))
                .collect(),
            nodes: self
                .graph
                .nodes()
                .iter()
                .map(|node| NodeView {
                    id: node.id(),
                    name: node.name(),
                    color: node.color(),
                    active: node.is_active(),
                    events: node.recent().len(),
                    selected: self.selected == Some(node.id()),
                })
                .collect(),
            edges: self.edges(),
            panel: PanelView::from_panel(&self.detail_panel(), self.show_details),
            notices: self.notices.active(now).map(|n| n.to_string()).collect(),
            notices_total: self.notices.pushed(),
        }
    }
}
