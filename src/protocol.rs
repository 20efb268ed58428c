use crate::error::{BridgeError, Result};
use crate::types::Pid;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Message text HEOS sends while a long-running command is still executing
const UNDER_PROCESS: &str = "command under process";

/// Result marker for successful commands
const SUCCESS: &str = "success";

/// Correlation key of a request: `(group, command)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub group: String,
    pub command: String,
}

impl CommandKey {
    pub fn new(group: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.command)
    }
}

/// Outgoing HEOS command, a single `heos://group/command?key=value&...` line
#[derive(Debug, Clone)]
pub struct HeosCommand {
    key: CommandKey,
    params: Vec<(String, String)>,
}

impl HeosCommand {
    /// Create a new command with no parameters
    pub fn new(group: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            key: CommandKey::new(group, command),
            params: Vec::new(),
        }
    }

    /// Append a parameter. Values are sent as-is.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Address the command to a player
    pub fn for_player(self, pid: Pid) -> Self {
        self.param("pid", pid)
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    /// Wire form without the line terminator
    pub fn to_wire(&self) -> String {
        let mut line = format!("heos://{}", self.key);
        if !self.params.is_empty() {
            let query = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            line.push('?');
            line.push_str(&query);
        }
        line
    }
}

/// Flat key/value set carried in the `message` string of a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFields(Vec<(String, String)>);

impl MessageFields {
    /// Parse a `key=value&key=value` message. Keys without `=` get an empty value.
    pub fn parse(message: &str) -> Self {
        let fields = message
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.to_string(), decode(v)),
                None => (part.to_string(), String::new()),
            })
            .collect();
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

fn decode(value: &str) -> String {
    match urlencoding::decode(value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    heos: RawHeader,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    options: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    command: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Inbound HEOS frame (command response or event)
///
/// A JSON object with a `heos` header, a structured `message` string and
/// optional `payload`/`options` members.
#[derive(Debug, Clone, PartialEq)]
pub struct HeosFrame {
    pub key: CommandKey,
    /// `None` when the frame carries no result field (events)
    pub result: Option<String>,
    pub message: MessageFields,
    pub payload: Option<Value>,
    pub options: Option<Value>,
}

impl HeosFrame {
    /// Parse one JSON line from the player
    pub fn parse(line: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(line)?;
        let (group, command) = raw.heos.command.split_once('/').ok_or_else(|| {
            BridgeError::InvalidResponse(format!("Malformed command: {}", raw.heos.command))
        })?;

        Ok(Self {
            key: CommandKey::new(group, command),
            result: raw.heos.result,
            message: raw
                .heos
                .message
                .as_deref()
                .map(MessageFields::parse)
                .unwrap_or_default(),
            payload: raw.payload,
            options: raw.options,
        })
    }

    pub fn group(&self) -> &str {
        &self.key.group
    }

    pub fn command(&self) -> &str {
        &self.key.command
    }

    /// True when a result is present and is not `success`
    pub fn is_failure(&self) -> bool {
        self.result.as_deref().is_some_and(|r| r != SUCCESS)
    }

    /// Interim acknowledgement of a long-running command
    pub fn is_under_process(&self) -> bool {
        self.message.contains(UNDER_PROCESS)
    }

    /// Unsolicited change notification (`event/...`)
    pub fn is_event(&self) -> bool {
        self.key.group == "event"
    }

    /// Player the frame is addressed to; `None` for system frames
    pub fn pid(&self) -> Option<Pid> {
        self.message.get_i64("pid")
    }

    /// Convert a failure frame into the matching error
    pub fn failure(&self) -> BridgeError {
        BridgeError::CommandFailed {
            command: self.key.to_string(),
            eid: self.message.get_i64("eid"),
            text: self
                .message
                .get("text")
                .unwrap_or(self.result.as_deref().unwrap_or("fail"))
                .to_string(),
        }
    }
}
