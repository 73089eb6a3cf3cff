//! JSON hub protocol spoken over WebSocket text frames.
//!
//! Wire format:
//! ```text
//! ┌──────────────────────────────┬──────┬──────────────────┬──────┐
//! │ {"type":1,"target":..,...}   │ 0x1E │ {"type":6}       │ 0x1E │
//! └──────────────────────────────┴──────┴──────────────────┴──────┘
//! ```
//!
//! A frame carries one or more JSON records, each terminated by the record
//! separator. The first exchange on a socket is the handshake
//! (`{"protocol":"json","version":1}` answered by `{}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// Record terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Numeric message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    fn from_u64(raw: u64) -> Option<Self> {
        Some(match raw {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            _ => return None,
        })
    }
}

/// Messages this client sends or understands.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a method on the other side. Server pushes carry no id.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of an invocation that carried an id.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    /// The server is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream messages and anything newer; ignored.
    Other(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationRecord {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    target: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRecord {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseRecord {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: u64,
}

impl HubMessage {
    pub fn invocation(invocation_id: Option<String>, target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self::Invocation {
            invocation_id,
            target: target.into(),
            arguments,
        }
    }

    pub fn completion(invocation_id: impl Into<String>, result: Option<Value>) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result,
            error: None,
        }
    }

    pub fn completion_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Completion {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Serialize to one terminated record.
    pub fn encode(&self) -> Result<String, ChannelError> {
        let json = match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => serde_json::to_string(&InvocationRecord {
                kind: MessageType::Invocation as u8,
                invocation_id: invocation_id.clone(),
                target: target.clone(),
                arguments: arguments.clone(),
            }),
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => serde_json::to_string(&CompletionRecord {
                kind: MessageType::Completion as u8,
                invocation_id: invocation_id.clone(),
                result: result.clone(),
                error: error.clone(),
            }),
            HubMessage::Ping => Ok(format!(r#"{{"type":{}}}"#, MessageType::Ping as u8)),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => serde_json::to_string(&CloseRecord {
                kind: MessageType::Close as u8,
                error: error.clone(),
                allow_reconnect: *allow_reconnect,
            }),
            HubMessage::Other(kind) => Ok(format!(r#"{{"type":{kind}}}"#)),
        }
        .map_err(|e| ChannelError::Protocol(e.to_string()))?;

        let mut record = json;
        record.push(RECORD_SEPARATOR);
        Ok(record)
    }

    /// Parse one record (without its separator).
    pub fn decode(record: &str) -> Result<Self, ChannelError> {
        let envelope: Envelope = serde_json::from_str(record)
            .map_err(|e| ChannelError::Protocol(format!("invalid record: {e}")))?;

        let decode_err = |e: serde_json::Error| ChannelError::Protocol(e.to_string());
        match MessageType::from_u64(envelope.kind) {
            Some(MessageType::Invocation) => {
                let rec: InvocationRecord = serde_json::from_str(record).map_err(decode_err)?;
                Ok(HubMessage::Invocation {
                    invocation_id: rec.invocation_id,
                    target: rec.target,
                    arguments: rec.arguments,
                })
            }
            Some(MessageType::Completion) => {
                let rec: CompletionRecord = serde_json::from_str(record).map_err(decode_err)?;
                Ok(HubMessage::Completion {
                    invocation_id: rec.invocation_id,
                    result: rec.result,
                    error: rec.error,
                })
            }
            Some(MessageType::Ping) => Ok(HubMessage::Ping),
            Some(MessageType::Close) => {
                let rec: CloseRecord = serde_json::from_str(record).map_err(decode_err)?;
                Ok(HubMessage::Close {
                    error: rec.error,
                    allow_reconnect: rec.allow_reconnect,
                })
            }
            _ => Ok(HubMessage::Other(envelope.kind)),
        }
    }
}

/// Split a text frame into its records, skipping empty trailing pieces.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

/// Decode every record of a frame.
pub fn decode_frame(frame: &str) -> Vec<Result<HubMessage, ChannelError>> {
    split_records(frame).map(HubMessage::decode).collect()
}

/// Handshake request sent right after the socket opens.
pub fn handshake_request() -> String {
    let mut record = r#"{"protocol":"json","version":1}"#.to_string();
    record.push(RECORD_SEPARATOR);
    record
}

/// Check the handshake answer (`{}` or `{"error": ..}`).
pub fn parse_handshake_response(record: &str) -> Result<(), ChannelError> {
    #[derive(Deserialize)]
    struct HandshakeResponse {
        #[serde(default)]
        error: Option<String>,
    }

    let response: HandshakeResponse = serde_json::from_str(record)
        .map_err(|e| ChannelError::Protocol(format!("invalid handshake response: {e}")))?;
    match response.error {
        Some(error) => Err(ChannelError::Connection(format!("handshake rejected: {error}"))),
        None => Ok(()),
    }
}

/// Payload delivered to topic subscribers: the single argument, or the
/// whole argument list when there are several.
pub fn topic_payload(mut arguments: Vec<Value>) -> Value {
    if arguments.len() == 1 {
        arguments.remove(0)
    } else {
        Value::Array(arguments)
    }
}
