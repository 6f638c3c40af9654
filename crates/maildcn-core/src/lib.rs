//! MailDCN Core - protocol-event aggregation for the DCN monitor
//!
//! This crate receives protocol events pushed by the email server backend,
//! keeps bounded views of them, tracks per-protocol node activity and drives
//! the guided story playback shown by the monitor.

pub mod alerts;
pub mod api;
pub mod buffer;
pub mod channel;
pub mod graph;
pub mod ingest;
pub mod monitor;
pub mod notice;
pub mod pacing;
pub mod service;
pub mod session;
pub mod story;
pub mod view;

pub use alerts::AlertIngest;
pub use api::ApiClient;
pub use buffer::{BoundedBuffer, EventBuffers, EventRef};
pub use channel::{ConnectionStatus, LocalChannel, PushChannel, SocketIoChannel};
pub use graph::{ProtocolGraph, ProtocolNode};
pub use ingest::EventIngest;
pub use monitor::DcnMonitor;
pub use notice::{Notice, NoticeLevel, Notices};
pub use service::{MonitorCommand, MonitorHandle, MonitorService};
pub use session::{AuthSession, FileStore, KeyValueStore, MemoryStore, SessionUser};
pub use story::{Playback, PlaybackState, StoryStep, STORY};
pub use view::{DetailPanel, MonitorSnapshot, PanelView};
