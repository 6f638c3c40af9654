//! Common types for MailDCN

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a protocol node (lowercase category id)
pub type NodeId = &'static str;

/// Protocol category an event is styled and routed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Smtp,
    Imap,
    Pop3,
    Tls,
    Tcp,
    Ai,
    Crypto,
    Database,
    /// Anything the monitor does not know about
    Other,
}

impl ProtocolKind {
    /// Known categories in pipeline order
    pub const ALL: [ProtocolKind; 8] = [
        ProtocolKind::Smtp,
        ProtocolKind::Imap,
        ProtocolKind::Pop3,
        ProtocolKind::Tls,
        ProtocolKind::Tcp,
        ProtocolKind::Ai,
        ProtocolKind::Crypto,
        ProtocolKind::Database,
    ];

    /// Parse a free-form protocol name, case-insensitively
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(name))
            .unwrap_or(ProtocolKind::Other)
    }

    /// Node id for this category
    pub fn id(&self) -> NodeId {
        match self {
            ProtocolKind::Smtp => "smtp",
            ProtocolKind::Imap => "imap",
            ProtocolKind::Pop3 => "pop3",
            ProtocolKind::Tls => "tls",
            ProtocolKind::Tcp => "tcp",
            ProtocolKind::Ai => "ai",
            ProtocolKind::Crypto => "crypto",
            ProtocolKind::Database => "database",
            ProtocolKind::Other => "other",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProtocolKind::Smtp => "SMTP",
            ProtocolKind::Imap => "IMAP",
            ProtocolKind::Pop3 => "POP3",
            ProtocolKind::Tls => "TLS Security",
            ProtocolKind::Tcp => "TCP/IP",
            ProtocolKind::Ai => "AI Analysis",
            ProtocolKind::Crypto => "Encryption",
            ProtocolKind::Database => "Database",
            ProtocolKind::Other => "Other",
        }
    }

    /// Accent colour used when rendering this category
    pub fn color(&self) -> &'static str {
        match self {
            ProtocolKind::Smtp => "#ff0080",
            ProtocolKind::Imap => "#ffa500",
            ProtocolKind::Pop3 => "#00ff80",
            ProtocolKind::Tls => "#8a2be2",
            ProtocolKind::Tcp => "#00ffff",
            ProtocolKind::Ai => "#ff69b4",
            ProtocolKind::Crypto => "#ffd700",
            ProtocolKind::Database => "#9370db",
            ProtocolKind::Other => "#666666",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A single protocol event pushed by the backend on the real-time channel.
///
/// Events are independent facts: nothing here references a prior event and
/// the producer's timestamp is kept verbatim without monotonicity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    /// Protocol or stage category, free-form
    pub protocol: String,

    /// Short label of what is happening
    pub stage: String,

    /// Human readable description
    #[serde(default)]
    pub details: String,

    /// Producer-assigned point in time
    #[serde(default)]
    pub timestamp: String,

    /// Opaque payload, rendered verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Correlation identifier (not used for joining)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,

    /// Event belongs to a demonstration batch
    #[serde(default)]
    pub demo: bool,

    /// Position inside a demonstration batch (1-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,

    /// Size of the demonstration batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
}

impl ProtocolEvent {
    /// Create a new event stamped with the current time
    pub fn new(
        protocol: impl Into<String>,
        stage: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            stage: stage.into(),
            details: details.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: None,
            process_id: None,
            demo: false,
            step: None,
            total_steps: None,
        }
    }

    /// Replace the timestamp
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Attach a payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Category used for styling and routing
    pub fn kind(&self) -> ProtocolKind {
        ProtocolKind::parse(&self.protocol)
    }

    /// Whether this event belongs to the node with the given id
    pub fn matches(&self, node_id: &str) -> bool {
        self.protocol.trim().eq_ignore_ascii_case(node_id)
    }

    /// Timestamp parsed as RFC 3339 or as a naive ISO-8601 UTC time
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Clock time for display, falling back to the raw timestamp
    pub fn display_time(&self) -> String {
        match self.parsed_timestamp() {
            Some(ts) => ts.format("%H:%M:%S").to_string(),
            None => self.timestamp.clone(),
        }
    }

    /// Payload pretty-printed as JSON
    pub fn data_pretty(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::to_string_pretty(data).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_is_case_insensitive() {
        assert_eq!(ProtocolKind::parse("SMTP"), ProtocolKind::Smtp);
        assert_eq!(ProtocolKind::parse("Crypto"), ProtocolKind::Crypto);
        assert_eq!(ProtocolKind::parse("pop3"), ProtocolKind::Pop3);
        assert_eq!(ProtocolKind::parse("LDAP"), ProtocolKind::Other);
        assert_eq!(ProtocolKind::parse(""), ProtocolKind::Other);
    }

    #[test]
    fn test_deserialize_backend_event() {
        let json = serde_json::json!({
            "protocol": "TLS",
            "stage": "HANDSHAKE_START",
            "details": "TLS handshake negotiation started",
            "timestamp": "2024-05-01T12:30:45.123456",
            "data": {"version": "TLS 1.3"},
            "demo": true,
            "step": 3,
            "total_steps": 11
        });

        let event: ProtocolEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.kind(), ProtocolKind::Tls);
        assert!(event.matches("tls"));
        assert!(event.demo);
        assert_eq!(event.step, Some(3));
        assert_eq!(event.total_steps, Some(11));
        assert_eq!(event.process_id, None);
        assert_eq!(event.display_time(), "12:30:45");
    }

    #[test]
    fn test_minimal_event_and_unparseable_timestamp() {
        let json = r#"{"protocol":"custom","stage":"X","timestamp":"yesterday"}"#;
        let event: ProtocolEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), ProtocolKind::Other);
        assert_eq!(event.details, "");
        assert!(event.parsed_timestamp().is_none());
        assert_eq!(event.display_time(), "yesterday");
        assert!(event.data_pretty().is_none());
    }

    #[test]
    fn test_rfc3339_timestamp() {
        let event = ProtocolEvent::new("smtp", "EHLO", "hello")
            .with_timestamp("2024-05-01T10:00:00Z")
            .with_data(serde_json::json!({"command": "EHLO"}));
        assert_eq!(
            event.parsed_timestamp().unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
        assert!(event.data_pretty().unwrap().contains("\"command\": \"EHLO\""));
    }
}
