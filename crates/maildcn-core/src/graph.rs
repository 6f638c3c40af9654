//! Protocol node graph
//!
//! A fixed, hand-authored pipeline of protocol nodes. Nodes are created once
//! and annotated at runtime with an `active` flag and their latest events.
//! Adjacency is only used for rendering; it carries no causal meaning over
//! the live stream.

use crate::buffer::{BoundedBuffer, EventRef};
use maildcn_common::types::ProtocolKind;
use serde::Serialize;

/// Events kept per node
pub const NODE_EVENT_CAPACITY: usize = 10;

/// Pipeline: SMTP/IMAP/POP3 -> TLS -> TCP -> AI -> Crypto -> Database
const PIPELINE: [(ProtocolKind, Option<ProtocolKind>, &str); 8] = [
    (
        ProtocolKind::Smtp,
        Some(ProtocolKind::Tls),
        "Simple Mail Transfer Protocol handles outgoing email transmission and delivery between servers.",
    ),
    (
        ProtocolKind::Imap,
        Some(ProtocolKind::Tls),
        "Internet Message Access Protocol allows clients to access and manage emails stored on the server.",
    ),
    (
        ProtocolKind::Pop3,
        Some(ProtocolKind::Tls),
        "Post Office Protocol v3 downloads emails from server to client for offline access.",
    ),
    (
        ProtocolKind::Tls,
        Some(ProtocolKind::Tcp),
        "Transport Layer Security encrypts all communications to protect data in transit.",
    ),
    (
        ProtocolKind::Tcp,
        Some(ProtocolKind::Ai),
        "Transmission Control Protocol ensures reliable delivery of data packets across networks.",
    ),
    (
        ProtocolKind::Ai,
        Some(ProtocolKind::Crypto),
        "AI engine analyzes emails for threats, spam, phishing, and content classification.",
    ),
    (
        ProtocolKind::Crypto,
        Some(ProtocolKind::Database),
        "Advanced encryption protects email content before database storage using AES-256.",
    ),
    (
        ProtocolKind::Database,
        None,
        "Secure storage system for encrypted emails with redundancy and backup capabilities.",
    ),
];

/// A vertex of the pipeline graph
#[derive(Debug, Clone)]
pub struct ProtocolNode {
    kind: ProtocolKind,
    description: &'static str,
    next: Option<ProtocolKind>,
    active: bool,
    recent: BoundedBuffer<EventRef>,
}

impl ProtocolNode {
    fn new(kind: ProtocolKind, next: Option<ProtocolKind>, description: &'static str) -> Self {
        Self {
            kind,
            description,
            next,
            active: false,
            recent: BoundedBuffer::with_capacity(NODE_EVENT_CAPACITY),
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }

    pub fn name(&self) -> &'static str {
        self.kind.display_name()
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn color(&self) -> &'static str {
        self.kind.color()
    }

    /// Id of the downstream node, if any
    pub fn next(&self) -> Option<&'static str> {
        self.next.map(|kind| kind.id())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Latest events routed to this node, most recent first
    pub fn recent(&self) -> &BoundedBuffer<EventRef> {
        &self.recent
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: &'static str,
    pub to: &'static str,
}

/// The fixed protocol pipeline
#[derive(Debug, Clone)]
pub struct ProtocolGraph {
    nodes: Vec<ProtocolNode>,
}

impl ProtocolGraph {
    pub fn new() -> Self {
        let nodes = PIPELINE
            .iter()
            .map(|(kind, next, description)| ProtocolNode::new(*kind, *next, description))
            .collect();
        Self { nodes }
    }

    /// Route an event to its node. Returns false when no node matches, in
    /// which case no node state changes.
    pub fn record_event(&mut self, event: &EventRef) -> bool {
        match self.nodes.iter_mut().find(|node| event.matches(node.id())) {
            Some(node) => {
                node.active = true;
                node.recent.push(event.clone());
                true
            }
            None => false,
        }
    }

    /// Clear every node's `active` flag
    pub fn reset_activity(&mut self) {
        for node in &mut self.nodes {
            node.active = false;
        }
    }

    /// Drop the per-node event lists and activity
    pub fn clear(&mut self) {
        for node in &mut self.nodes {
            node.active = false;
            node.recent.clear();
        }
    }

    /// Look up a node case-insensitively
    pub fn node(&self, id: &str) -> Option<&ProtocolNode> {
        let id = id.trim();
        self.nodes.iter().find(|node| node.id().eq_ignore_ascii_case(id))
    }

    pub fn nodes(&self) -> &[ProtocolNode] {
        &self.nodes
    }

    /// Downstream neighbour of a node
    pub fn next_of(&self, id: &str) -> Option<&ProtocolNode> {
        self.node(id)
            .and_then(|node| node.next())
            .and_then(|next| self.node(next))
    }

    /// All edges in pipeline order
    pub fn edges(&self) -> Vec<Edge> {
        self.nodes
            .iter()
            .filter_map(|node| {
                node.next().map(|to| Edge {
                    from: node.id(),
                    to,
                })
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.active).count()
    }
}

impl Default for ProtocolGraph {
    fn default() -> Self {
        Self::new()
    }
}
