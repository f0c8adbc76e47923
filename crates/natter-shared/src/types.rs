use serde::{Deserialize, Serialize};

/// Opaque name a server announces on handshake. Every cached chat and
/// message is namespaced by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServerIdentity(pub String);

impl ServerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation token attached to every request and echoed by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Text = 0,
    Image = 1,
    File = 2,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Text),
            1 => Some(Self::Image),
            2 => Some(Self::File),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A chat session hosted by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    /// Server-assigned id; `None` until the server has listed the chat.
    pub id: Option<u64>,
    /// Unique per server.
    pub name: String,
    pub creator: String,
    pub description: String,
}

impl Chat {
    pub fn new(
        name: impl Into<String>,
        creator: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            creator: creator.into(),
            description: description.into(),
        }
    }
}

/// A message inside a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    /// Server-assigned, increasing within a chat.
    pub id: u64,
    pub text: String,
    pub sender: String,
    /// Attachment bytes for image and file messages.
    pub raw: Option<Vec<u8>>,
}

impl Message {
    pub fn text(id: u64, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Text,
            id,
            text: text.into(),
            sender: sender.into(),
            raw: None,
        }
    }
}

/// Payload of a message the local user sends. The server assigns the id
/// and fills in the sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub kind: MessageType,
    pub text: String,
    pub raw: Option<Vec<u8>>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Text,
            text: text.into(),
            raw: None,
        }
    }

    pub fn attachment(kind: MessageType, text: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            kind,
            text: text.into(),
            raw: Some(raw),
        }
    }
}
