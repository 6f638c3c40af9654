//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Engine.IO frame: `<type digit><data>`.
//! Socket.IO packet (inside an Engine.IO message):
//! `<type digit>[<namespace>,][<ack id>][<json>]`.
//! Binary attachments are not supported; the backend only sends JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type '{0}'")]
    UnknownType(char),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
}

/// Handshake data sent by the server in the OPEN packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Transport-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Application-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// CONNECT to the default namespace with an auth payload
    pub fn connect(auth: Option<Value>) -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: auth,
        }
    }

    /// EVENT on the default namespace
    pub fn event(name: impl Into<String>, payload: Option<Value>) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.into(),
            args: payload.into_iter().collect(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect { namespace, data } => {
                let mut out = format!("0{}", namespace_prefix(namespace));
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
            SocketPacket::Disconnect { namespace } => format!("1{}", namespace_prefix(namespace)),
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!(
                    "2{}{}{}",
                    namespace_prefix(namespace),
                    id.map(|id| id.to_string()).unwrap_or_default(),
                    Value::Array(array)
                )
            }
            SocketPacket::Ack {
                namespace,
                id,
                args,
            } => format!(
                "3{}{}{}",
                namespace_prefix(namespace),
                id,
                Value::Array(args.clone())
            ),
            SocketPacket::ConnectError { namespace, data } => {
                let mut out = format!("4{}", namespace_prefix(namespace));
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
        }
    }

    pub fn decode(input: &str) -> Result<Self, PacketError> {
        let mut chars = input.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(PacketError::Unsupported("binary attachments"));
        }
        if !matches!(kind, '0'..='4') {
            return Err(PacketError::UnknownType(kind));
        }

        let (namespace, rest) = split_namespace(rest);
        let (id, rest) = split_ack_id(rest);
        let data = parse_json(rest)?;

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    other => {
                        return Err(PacketError::InvalidEvent(format!(
                            "expected array payload, got {:?}",
                            other
                        )))
                    }
                };
                if args.is_empty() {
                    return Err(PacketError::InvalidEvent("missing event name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(PacketError::InvalidEvent(format!(
                            "event name is not a string: {}",
                            other
                        )))
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::InvalidEvent("ack without id".to_string()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            _ => Ok(SocketPacket::ConnectError { namespace, data }),
        }
    }
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => format!(
                "0{}",
                serde_json::to_string(info).unwrap_or_else(|_| "{}".to_string())
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(input: &str) -> Result<Self, PacketError> {
        let mut chars = input.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(EnginePacket::Open)
                .map_err(|e| PacketError::InvalidJson(e.to_string())),
            '1' => Ok(EnginePacket::Close),
            // Upgrade-time pings carry a payload suffix that is not needed here.
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => SocketPacket::decode(rest).map(EnginePacket::Message),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

fn split_namespace(input: &str) -> (String, &str) {
    if input.starts_with('/') {
        match input.find(',') {
            Some(idx) => (input[..idx].to_string(), &input[idx + 1..]),
            None => (input.to_string(), ""),
        }
    } else {
        (DEFAULT_NAMESPACE.to_string(), input)
    }
}

fn split_ack_id(input: &str) -> (Option<u64>, &str) {
    let end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    if end == 0 {
        return (None, input);
    }
    (input[..end].parse().ok(), &input[end..])
}

fn parse_json(input: &str) -> Result<Option<Value>, PacketError> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(input)
        .map(Some)
        .map_err(|e| PacketError::InvalidJson(e.to_string()))
}
