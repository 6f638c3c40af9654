//! Event ingest adapter
//!
//! Subscribes to the protocol-event topic of an injected push channel and
//! forwards each delivery, unchanged, into a queue drained by the monitor.

use crate::channel::{EventHandler, PushChannel, SubscriptionId};
use maildcn_common::config::ChannelConfig;
use maildcn_common::types::ProtocolEvent;
use maildcn_common::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the subscription on the current channel
pub struct EventIngest {
    channel: Option<Arc<dyn PushChannel>>,
    subscription: Option<SubscriptionId>,
    event_topic: String,
    demo_topic: String,
    tx: mpsc::UnboundedSender<ProtocolEvent>,
}

impl EventIngest {
    /// Subscribe to `channel` (if any) and return the queue of decoded events
    pub fn attach(
        channel: Option<Arc<dyn PushChannel>>,
        config: &ChannelConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ingest = Self {
            channel: None,
            subscription: None,
            event_topic: config.event_topic.clone(),
            demo_topic: config.demo_topic.clone(),
            tx,
        };
        ingest.rebind(channel);
        (ingest, rx)
    }

    /// Switch to another channel, unsubscribing from the previous one first
    pub fn rebind(&mut self, channel: Option<Arc<dyn PushChannel>>) {
        self.detach();

        let Some(channel) = channel else {
            debug!("No push channel, ingest idle");
            return;
        };

        let tx = self.tx.clone();
        let topic = self.event_topic.clone();
        let handler: EventHandler = Arc::new(move |payload: &Value| {
            match serde_json::from_value::<ProtocolEvent>(payload.clone()) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        debug!("Monitor gone, dropping '{}' delivery", topic);
                    }
                }
                Err(e) => warn!("Dropping malformed '{}' delivery: {}", topic, e),
            }
        });

        let id = channel.subscribe(&self.event_topic, handler);
        info!("Listening for '{}' events", self.event_topic);
        self.subscription = Some(id);
        self.channel = Some(channel);
    }

    /// Unsubscribe and forget the channel
    pub fn detach(&mut self) {
        if let (Some(channel), Some(id)) = (self.channel.take(), self.subscription.take()) {
            channel.unsubscribe(id);
            debug!("Unsubscribed from '{}'", self.event_topic);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn channel(&self) -> Option<&Arc<dyn PushChannel>> {
        self.channel.as_ref()
    }

    /// Ask the backend for one demonstration batch
    pub fn request_demo(&self) -> Result<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::Channel("not connected: sign in first".to_string()))?;
        channel.emit(&self.demo_topic, None)
    }
}

impl Drop for EventIngest {
    fn drop(&mut self) {
        self.detach();
    }
}
