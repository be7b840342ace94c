//! JSON wire messages: `{"method": ..., "data": ...}` in a text frame.
//!
//! Decoding routes `data` through the dispatcher's `decode-data` operation
//! under the configured protocol version context.

use crate::context::{Context, CHAT_MESSAGE, LOGIN_MESSAGE, PROTOCOL_V1, PROTOCOL_V2};
use crate::engine::ChatEngine;
use crate::error::{ChatError, ChatResult};
use crate::transport::Frame;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Message kind carried in the `method` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    Login,
    #[default]
    Chat,
    Inform,
    /// Unknown methods are kept verbatim and treated as chat.
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Login => "login",
            Method::Chat => "chat",
            Method::Inform => "inform",
            Method::Other(s) => s,
        }
    }

    /// Context activated while a message of this kind is handled.
    pub fn context(&self) -> Option<Context> {
        match self {
            Method::Login => Some(LOGIN_MESSAGE),
            Method::Chat => Some(CHAT_MESSAGE),
            Method::Inform | Method::Other(_) => None,
        }
    }
}

impl From<String> for Method {
    fn from(s: String) -> Self {
        match s.as_str() {
            "login" => Method::Login,
            "chat" => Method::Chat,
            "inform" => Method::Inform,
            _ => Method::Other(s),
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        Method::from(s.to_string())
    }
}

impl From<Method> for String {
    fn from(m: Method) -> String {
        match m {
            Method::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded chat message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    data: String,
    method: Method,
}

impl Message {
    pub fn new(method: Method, data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            method,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn into_data(self) -> String {
        self.data
    }
}

/// Incoming shape: `data` is required, `method` may be absent or null.
#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    method: Option<Method>,
    data: String,
}

/// Wire protocol version a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// No version context: data is stored verbatim.
    #[serde(rename = "none")]
    Unversioned,
    V1,
    #[default]
    V2,
}

impl ProtocolVersion {
    pub fn context(&self) -> Option<Context> {
        match self {
            ProtocolVersion::Unversioned => None,
            ProtocolVersion::V1 => Some(PROTOCOL_V1),
            ProtocolVersion::V2 => Some(PROTOCOL_V2),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ProtocolVersion::Unversioned),
            "v1" | "1" => Ok(ProtocolVersion::V1),
            "v2" | "2" => Ok(ProtocolVersion::V2),
            other => Err(format!("unknown protocol version: {other}")),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolVersion::Unversioned => "none",
            ProtocolVersion::V1 => "v1",
            ProtocolVersion::V2 => "v2",
        })
    }
}

/// Encodes and decodes wire messages for one protocol version.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    version: ProtocolVersion,
}

impl MessageCodec {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Decode a frame into a message.
    ///
    /// Binary frames are rejected with [`ChatError::UnsupportedContent`].
    pub fn decode(&self, engine: &ChatEngine, frame: &Frame) -> ChatResult<Message> {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(_) => return Err(ChatError::UnsupportedContent),
        };
        let wire: WireMessage = serde_json::from_str(text)?;

        let _version = engine.stack().push(self.version.context());
        let data = engine
            .dispatcher()
            .decode_data()
            .invoke(&(), &engine.stack().active(), wire.data)?;

        Ok(Message {
            data,
            method: wire.method.unwrap_or_default(),
        })
    }

    pub fn encode(&self, message: &Message) -> ChatResult<Frame> {
        Ok(Frame::Text(serde_json::to_string(message)?))
    }
}

/// Remove bracketed formatting tags (`[b]`, `[/url]`, `[color=red]`) and one
/// newline following each tag.
pub fn strip_markup(data: &str) -> String {
    static MARKUP_RE: OnceLock<Regex> = OnceLock::new();
    let re = MARKUP_RE.get_or_init(|| Regex::new(r"\[[\w\s=/]*\]\n?").unwrap());
    re.replace_all(data, "").into_owned()
}
