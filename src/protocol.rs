//! Line-delimited JSON codec spoken with subprocess agents.
//!
//! * Arena -> Agent: `{"type":"turn","game":..,"player":0|1,"state":..,"legal_moves":[..],"ts_ms":..}`
//! * Agent -> Arena: `{"type":"move","move":..}` or `{"type":"error","error":".."}`
//!
//! Any other `type` sent by an agent is ignored, which leaves room for extensions (logs,
//! heartbeats, ...). Lines that are not JSON objects with a string `type` are malformed.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::game_interface::{GameState, Move, Player};

/// Turn notification written to an agent's stdin.
#[derive(Debug, Serialize)]
pub struct TurnMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Game identifier
    pub game: &'a str,
    /// Seat of the agent
    pub player: Player,
    /// Current state
    pub state: &'a GameState,
    /// Moves the agent may choose from
    pub legal_moves: &'a [Move],
    /// Wall-clock time of the notification, in milliseconds since the Unix epoch
    pub ts_ms: i64,
}

impl<'a> TurnMessage<'a> {
    /// Turn notification stamped with the current time.
    pub fn new(game: &'a str, player: Player, state: &'a GameState, legal_moves: &'a [Move]) -> Self {
        Self {
            kind: "turn",
            game,
            player,
            state,
            legal_moves,
            ts_ms: epoch_millis(),
        }
    }

    /// Serialized notification, without the trailing newline.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// A decoded line sent by an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// The agent chose a move.
    Move(Move),
    /// The agent gave up on this turn.
    Error(String),
    /// A message type the arena does not know about.
    Ignored(String),
}

impl AgentMessage {
    /// True for the messages that end a read loop.
    pub fn is_terminating(&self) -> bool {
        !matches!(self, AgentMessage::Ignored(_))
    }
}

/// Codec failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line is not JSON.
    #[error("line is not valid JSON: {source}")]
    Malformed {
        /// parser error
        #[source]
        source: serde_json::Error,
    },
    /// Valid JSON, but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),
    /// Object without a string `type` field.
    #[error("message has no string 'type' field")]
    MissingType,
    /// A terminating message without its payload field.
    #[error("'{kind}' message is missing its '{field}' field")]
    MissingField {
        /// message type
        kind: &'static str,
        /// absent field
        field: &'static str,
    },
    /// The turn notification could not be serialized.
    #[error("could not encode turn message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decodes one (non blank) line written by an agent.
pub fn decode_line(line: &str) -> Result<AgentMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|source| ProtocolError::Malformed { source })?;
    let Value::Object(mut object) = value else {
        return Err(ProtocolError::NotAnObject(value.to_string()));
    };
    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(ProtocolError::MissingType),
    };
    match kind.as_str() {
        "move" => object
            .remove("move")
            .map(AgentMessage::Move)
            .ok_or(ProtocolError::MissingField {
                kind: "move",
                field: "move",
            }),
        "error" => match object.remove("error") {
            Some(Value::String(text)) => Ok(AgentMessage::Error(text)),
            Some(other) => Ok(AgentMessage::Error(other.to_string())),
            None => Err(ProtocolError::MissingField {
                kind: "error",
                field: "error",
            }),
        },
        _ => Ok(AgentMessage::Ignored(kind)),
    }
}

pub(crate) fn epoch_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
