use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// `type` tag the server uses for its connection notice.
pub const HANDSHAKE_TYPE: &str = "connection";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateTransition,
    SubStateLog,
    ChainStart,
    ChainEnd,
    ToolStart,
    ToolEnd,
    Error,
    Info,
    Unknown(String),
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "state_transition" => EventKind::StateTransition,
            "sub_state_log" => EventKind::SubStateLog,
            "chain_start" => EventKind::ChainStart,
            "chain_end" => EventKind::ChainEnd,
            "tool_start" => EventKind::ToolStart,
            "tool_end" => EventKind::ToolEnd,
            "error" => EventKind::Error,
            "info" => EventKind::Info,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::StateTransition => "state_transition",
            EventKind::SubStateLog => "sub_state_log",
            EventKind::ChainStart => "chain_start",
            EventKind::ChainEnd => "chain_end",
            EventKind::ToolStart => "tool_start",
            EventKind::ToolEnd => "tool_end",
            EventKind::Error => "error",
            EventKind::Info => "info",
            EventKind::Unknown(tag) => tag.as_str(),
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, EventKind::StateTransition)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(EventKind::from_tag(input))
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(EventKind::from_tag(&tag))
    }
}

/// A session event as pushed by the research server.
///
/// The payload is kept exactly as received; only the presence of `type` and
/// `timestamp` is checked. Field access goes through [`Envelope::field`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: Value,
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: EventKind, timestamp: impl Into<Value>, data: Value) -> Self {
        Self {
            kind,
            timestamp: timestamp.into(),
            data,
        }
    }

    /// Resolves the raw timestamp: RFC 3339 strings and epoch milliseconds
    /// are understood, anything else maps to the current time.
    pub fn instant(&self) -> DateTime<Utc> {
        parse_instant(&self.timestamp).unwrap_or_else(Utc::now)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|value| !value.is_null())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("connection handshake notice")]
    Handshake,
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no type")]
    MissingType,
    #[error("frame has no timestamp")]
    MissingTimestamp,
}

/// Classifies a decoded frame as a session event.
pub fn parse_envelope(payload: &Value) -> Result<Envelope, Rejection> {
    let map = payload.as_object().ok_or(Rejection::NotAnObject)?;

    let tag = match map.get("type") {
        Some(Value::String(tag)) if tag == HANDSHAKE_TYPE => return Err(Rejection::Handshake),
        Some(Value::String(tag)) if !tag.is_empty() => tag,
        _ => return Err(Rejection::MissingType),
    };

    let timestamp = match map.get("timestamp") {
        None | Some(Value::Null) => return Err(Rejection::MissingTimestamp),
        Some(Value::String(raw)) if raw.is_empty() => return Err(Rejection::MissingTimestamp),
        Some(value) => value.clone(),
    };

    Ok(Envelope {
        kind: EventKind::from_tag(tag),
        timestamp,
        data: map.get("data").cloned().unwrap_or(Value::Null),
    })
}

fn parse_instant(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            text.trim()
                .parse::<i64>()
                .ok()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        }
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
