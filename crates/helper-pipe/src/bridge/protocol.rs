//! Wire schema for client-helper messages.
//!
//! One request frame is always answered by exactly one response frame. Only
//! `stop` has a meaning to this crate; every other command is carried by name
//! and left to the helper.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Command selector carried by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Zero value; helpers reject it without dispatching.
    #[default]
    Invalid,
    /// Ask the helper to reply and then exit.
    Stop,
    /// Helper-defined command, carried verbatim.
    #[serde(untagged)]
    Other(String),
}

impl Command {
    /// Build a command from its wire name.
    ///
    /// Reserved names map to their dedicated variants so that a command always
    /// serializes to the same value it was parsed from.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            "invalid" => Self::Invalid,
            "stop" => Self::Stop,
            _ => Self::Other(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Invalid => "invalid",
            Self::Stop => "stop",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message from client to helper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub command: Command,
    /// Opaque command-specific bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Optional unsigned argument (durations, pin numbers, ...).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub arg: u32,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Command::new(command),
            ..Self::default()
        }
    }

    /// The reserved terminate request.
    pub fn stop() -> Self {
        Self {
            command: Command::Stop,
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_arg(mut self, arg: u32) -> Self {
        self.arg = arg;
        self
    }

    pub fn is_stop(&self) -> bool {
        self.command == Command::Stop
    }
}

/// Compact form used to annotate errors.
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command={}", self.command)?;
        if self.arg != 0 {
            write!(f, " arg={}", self.arg)?;
        }
        if !self.payload.is_empty() {
            write!(f, " payload={}", hex(&self.payload))?;
        }
        Ok(())
    }
}

/// Outcome reported by the helper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Invalid,
    Ok,
    /// The request was malformed or not understood.
    ErrInput,
    /// The helper understood the request but the operation failed.
    ErrHelper,
}

/// Message from helper to client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            ..Self::default()
        }
    }

    pub fn ok_with(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn err_input(error: impl Into<String>) -> Self {
        Self {
            status: Status::ErrInput,
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn err_helper(error: impl Into<String>) -> Self {
        Self {
            status: Status::ErrHelper,
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Payload on `ok`, the helper's error otherwise.
    pub fn into_result(self) -> Result<Vec<u8>, HelperError> {
        match self.status {
            Status::Ok => Ok(self.payload),
            status => Err(HelperError {
                status,
                message: self.error,
            }),
        }
    }
}

/// Non-`ok` response surfaced as an error value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("helper returned {status:?}: {message}")]
pub struct HelperError {
    pub status: Status,
    pub message: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Opaque payloads travel as base64 text inside the JSON body.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_request_serializes() {
        insta::assert_json_snapshot!(Request::stop(), @r#"
        {
          "command": "stop"
        }
        "#);
    }

    #[test]
    fn helper_command_serializes_with_payload() {
        let req = Request::new("mdb_tx").with_payload("ping").with_arg(300);
        insta::assert_json_snapshot!(req, @r#"
        {
          "command": "mdb_tx",
          "payload": "cGluZw==",
          "arg": 300
        }
        "#);
    }

    #[test]
    fn error_response_serializes() {
        insta::assert_json_snapshot!(Response::err_input("invalid command"), @r#"
        {
          "status": "err_input",
          "error": "invalid command"
        }
        "#);
    }

    #[test]
    fn empty_body_decodes_to_invalid_command() {
        let req: Request = serde_json::from_str("{}").unwrap();
        assert_eq!(req.command, Command::Invalid);
        assert!(req.payload.is_empty());
    }

    #[test]
    fn reserved_names_parse_to_reserved_variants() {
        let req: Request = serde_json::from_str(r#"{"command":"stop"}"#).unwrap();
        assert!(req.is_stop());
        assert_eq!(Command::new("stop"), Command::Stop);
        assert_eq!(Command::new("echo"), Command::Other("echo".to_string()));
    }

    #[test]
    fn display_includes_hex_payload() {
        let req = Request::new("echo").with_payload(vec![0xde, 0xad]);
        assert_eq!(req.to_string(), "command=echo payload=dead");
        assert_eq!(Request::stop().to_string(), "command=stop");
    }

    #[test]
    fn into_result_splits_on_status() {
        assert_eq!(Response::ok_with("x").into_result().unwrap(), b"x".to_vec());

        let err = Response::err_helper("bus timeout").into_result().unwrap_err();
        assert_eq!(err.status, Status::ErrHelper);
        assert_eq!(err.message, "bus timeout");
    }

    #[test]
    fn bad_base64_payload_is_rejected() {
        let res = serde_json::from_str::<Response>(r#"{"status":"ok","payload":"***"}"#);
        assert!(res.is_err());
    }
}
