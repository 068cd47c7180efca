//! Command envelope and typed actions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ChannelError;
use crate::frame::{FrameError, MAX_PAYLOAD};
use crate::supervisor::PoolSnapshot;

/// Operator action carried by a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start { daemon: bool },
    Stop,
    Reload,
    Status,
}

impl Action {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start { .. } => "start",
            Action::Stop => "stop",
            Action::Reload => "reload",
            Action::Status => "status",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command name the receiver does not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command '{}'", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

/// Request/response envelope exchanged over the control channel.
///
/// The sender creates it with a fresh `id`; the receiver fills `result`
/// exactly once and echoes the whole envelope back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Command {
    pub fn new(action: Action) -> Self {
        let mut options = Map::new();
        if let Action::Start { daemon } = action {
            options.insert("daemon".into(), Value::Bool(daemon));
        }

        Self {
            id: Uuid::new_v4().to_string(),
            name: action.name().to_string(),
            arguments: Vec::new(),
            options,
            result: None,
        }
    }

    /// Map the string name onto a typed action.
    pub fn action(&self) -> Result<Action, UnknownCommand> {
        match self.name.as_str() {
            "start" => Ok(Action::Start {
                daemon: self
                    .options
                    .get("daemon")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            "stop" => Ok(Action::Stop),
            "reload" => Ok(Action::Reload),
            "status" => Ok(Action::Status),
            other => Err(UnknownCommand(other.to_string())),
        }
    }

    /// True once the receiver has populated `result`.
    pub fn is_response(&self) -> bool {
        self.result.is_some()
    }

    /// Echo this command back with `reply` as its result.
    pub fn respond(mut self, reply: &Reply) -> Result<Self, ChannelError> {
        self.result = Some(serde_json::to_value(reply)?);
        Ok(self)
    }

    /// Parse the populated result.
    pub fn reply(&self) -> Result<Reply, ChannelError> {
        match &self.result {
            Some(value) => Ok(Reply::deserialize(value)?),
            None => Err(ChannelError::Closed),
        }
    }

    /// Serialize for framing.
    pub fn to_payload(&self) -> Result<Vec<u8>, ChannelError> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge { len: payload.len() }.into());
        }
        Ok(payload)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, ChannelError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Result slot content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PoolSnapshot>,
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            status: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: PoolSnapshot) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip_through_envelope() {
        for action in [
            Action::Start { daemon: true },
            Action::Start { daemon: false },
            Action::Stop,
            Action::Reload,
            Action::Status,
        ] {
            let command = Command::new(action);
            let decoded = Command::from_payload(&command.to_payload().unwrap()).unwrap();
            assert_eq!(decoded.action().unwrap(), action);
            assert!(!decoded.is_response());
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Command::new(Action::Status);
        let b = Command::new(Action::Status);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_wire_shape() {
        let command = Command::new(Action::Reload);
        let value: Value = serde_json::from_slice(&command.to_payload().unwrap()).unwrap();

        assert_eq!(value["name"], "reload");
        assert_eq!(value["arguments"], Value::Array(vec![]));
        assert!(value["options"].is_object());
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_unknown_name() {
        let payload = br#"{"id":"1","name":"restart","arguments":[],"options":{}}"#;
        let command = Command::from_payload(payload).unwrap();
        assert_eq!(command.action(), Err(UnknownCommand("restart".into())));
    }

    #[test]
    fn test_respond_sets_result_once() {
        let command = Command::new(Action::Stop);
        let id = command.id.clone();

        let response = command.respond(&Reply::ok("stopping")).unwrap();
        assert_eq!(response.id, id);
        assert!(response.is_response());
        assert_eq!(response.reply().unwrap(), Reply::ok("stopping"));
    }

    #[test]
    fn test_missing_optional_fields() {
        let command = Command::from_payload(br#"{"id":"x","name":"status"}"#).unwrap();
        assert!(command.arguments.is_empty());
        assert!(command.options.is_empty());
        assert_eq!(command.action().unwrap(), Action::Status);
    }
}
