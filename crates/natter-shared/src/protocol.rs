//! Command frames exchanged between client and server.
//!
//! A frame is one tag byte followed by tag-specific fields encoded with
//! [`crate::codec`]. Requests and their responses carry a `u64` correlation
//! token directly after the tag; pushed messages carry the token of the
//! subscription they belong to.

use bytes::{Bytes, BytesMut};

use crate::codec::{put_blob, put_flag, put_string, put_u64, put_u8, Reader};
use crate::error::CodecError;
use crate::types::{Chat, Message, MessageType, OutgoingMessage, RequestId, ServerIdentity};

/// Client -> server tags.
pub mod client_tag {
    pub const INTRODUCE: u8 = 0x01;
    pub const LIST_CHATS: u8 = 0x02;
    pub const NEW_CHAT: u8 = 0x03;
    pub const SUBSCRIBE: u8 = 0x04;
    pub const MESSAGE: u8 = 0x05;
    pub const HEARTBEAT: u8 = 0x06;
}

/// Server -> client tags.
pub mod server_tag {
    pub const LIST_CHATS_RESULT: u8 = 0x81;
    pub const NEW_CHAT_RESULT: u8 = 0x82;
    pub const SUBSCRIBE_RESULT: u8 = 0x83;
    pub const MESSAGE: u8 = 0x84;
    pub const MESSAGE_RECEIPT: u8 = 0x85;
    pub const HEARTBEAT: u8 = 0x86;
}

/// Commands written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Announce the local user's name.
    Introduce { request: RequestId, name: String },
    ListChats { request: RequestId },
    NewChat {
        request: RequestId,
        name: String,
        creator: String,
        description: String,
    },
    /// Ask for every message of `chat` newer than `since_id`.
    Subscribe {
        request: RequestId,
        chat: String,
        since_id: u64,
    },
    /// Post to the chat the connection is subscribed to.
    Message {
        request: RequestId,
        message: OutgoingMessage,
    },
    Heartbeat,
}

/// Commands written by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    ListChatsResult {
        request: RequestId,
        server: ServerIdentity,
        chats: Vec<Chat>,
    },
    NewChatResult { request: RequestId, ok: bool },
    /// `messages` is only present on the wire when `ok` is set.
    SubscribeResult {
        request: RequestId,
        ok: bool,
        messages: Vec<Message>,
    },
    /// Unsolicited message for an active subscription.
    Message {
        subscription: RequestId,
        message: Message,
    },
    MessageReceipt {
        request: RequestId,
        ok: bool,
        error: Option<String>,
    },
    Heartbeat,
}

impl ClientCommand {
    pub fn tag(&self) -> u8 {
        match self {
            ClientCommand::Introduce { .. } => client_tag::INTRODUCE,
            ClientCommand::ListChats { .. } => client_tag::LIST_CHATS,
            ClientCommand::NewChat { .. } => client_tag::NEW_CHAT,
            ClientCommand::Subscribe { .. } => client_tag::SUBSCRIBE,
            ClientCommand::Message { .. } => client_tag::MESSAGE,
            ClientCommand::Heartbeat => client_tag::HEARTBEAT,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        put_u8(dst, self.tag());
        match self {
            ClientCommand::Introduce { request, name } => {
                put_u64(dst, request.0);
                put_string(dst, name)?;
            }
            ClientCommand::ListChats { request } => {
                put_u64(dst, request.0);
            }
            ClientCommand::NewChat {
                request,
                name,
                creator,
                description,
            } => {
                put_u64(dst, request.0);
                put_string(dst, name)?;
                put_string(dst, creator)?;
                put_string(dst, description)?;
            }
            ClientCommand::Subscribe {
                request,
                chat,
                since_id,
            } => {
                put_u64(dst, request.0);
                put_string(dst, chat)?;
                put_u64(dst, *since_id);
            }
            ClientCommand::Message { request, message } => {
                put_u64(dst, request.0);
                put_u8(dst, message.kind.as_byte());
                put_string(dst, &message.text)?;
                put_blob(dst, message.raw.as_deref());
            }
            ClientCommand::Heartbeat => {}
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one command from the front of `data`, returning it together
    /// with the number of bytes it occupied.
    pub fn decode(data: &[u8], max_field_len: usize) -> Result<(Self, usize), CodecError> {
        let mut r = Reader::new(data, max_field_len);
        let cmd = match r.u8()? {
            client_tag::INTRODUCE => ClientCommand::Introduce {
                request: RequestId(r.u64()?),
                name: r.string()?,
            },
            client_tag::LIST_CHATS => ClientCommand::ListChats {
                request: RequestId(r.u64()?),
            },
            client_tag::NEW_CHAT => ClientCommand::NewChat {
                request: RequestId(r.u64()?),
                name: r.string()?,
                creator: r.string()?,
                description: r.string()?,
            },
            client_tag::SUBSCRIBE => ClientCommand::Subscribe {
                request: RequestId(r.u64()?),
                chat: r.string()?,
                since_id: r.u64()?,
            },
            client_tag::MESSAGE => {
                let request = RequestId(r.u64()?);
                let kind = read_kind(&mut r)?;
                ClientCommand::Message {
                    request,
                    message: OutgoingMessage {
                        kind,
                        text: r.string()?,
                        raw: r.blob()?,
                    },
                }
            }
            client_tag::HEARTBEAT => ClientCommand::Heartbeat,
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok((cmd, r.position()))
    }
}

impl ServerCommand {
    pub fn tag(&self) -> u8 {
        match self {
            ServerCommand::ListChatsResult { .. } => server_tag::LIST_CHATS_RESULT,
            ServerCommand::NewChatResult { .. } => server_tag::NEW_CHAT_RESULT,
            ServerCommand::SubscribeResult { .. } => server_tag::SUBSCRIBE_RESULT,
            ServerCommand::Message { .. } => server_tag::MESSAGE,
            ServerCommand::MessageReceipt { .. } => server_tag::MESSAGE_RECEIPT,
            ServerCommand::Heartbeat => server_tag::HEARTBEAT,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        put_u8(dst, self.tag());
        match self {
            ServerCommand::ListChatsResult {
                request,
                server,
                chats,
            } => {
                put_u64(dst, request.0);
                put_string(dst, server.as_str())?;
                put_u64(dst, chats.len() as u64);
                for chat in chats {
                    put_u64(dst, chat.id.unwrap_or(0));
                    put_string(dst, &chat.name)?;
                    put_string(dst, &chat.creator)?;
                    put_string(dst, &chat.description)?;
                }
            }
            ServerCommand::NewChatResult { request, ok } => {
                put_u64(dst, request.0);
                put_flag(dst, *ok);
            }
            ServerCommand::SubscribeResult {
                request,
                ok,
                messages,
            } => {
                put_u64(dst, request.0);
                put_flag(dst, *ok);
                if *ok {
                    put_u64(dst, messages.len() as u64);
                    for message in messages {
                        put_message(dst, message)?;
                    }
                }
            }
            ServerCommand::Message {
                subscription,
                message,
            } => {
                put_u64(dst, subscription.0);
                put_message(dst, message)?;
            }
            ServerCommand::MessageReceipt { request, ok, error } => {
                put_u64(dst, request.0);
                put_flag(dst, *ok);
                put_string(dst, error.as_deref().unwrap_or(""))?;
            }
            ServerCommand::Heartbeat => {}
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one command from the front of `data`, returning it together
    /// with the number of bytes it occupied.
    pub fn decode(data: &[u8], max_field_len: usize) -> Result<(Self, usize), CodecError> {
        let mut r = Reader::new(data, max_field_len);
        let cmd = match r.u8()? {
            server_tag::LIST_CHATS_RESULT => {
                let request = RequestId(r.u64()?);
                let server = ServerIdentity(r.string()?);
                let count = r.u64()?;
                let mut chats = Vec::new();
                for _ in 0..count {
                    chats.push(Chat {
                        id: Some(r.u64()?),
                        name: r.string()?,
                        creator: r.string()?,
                        description: r.string()?,
                    });
                }
                ServerCommand::ListChatsResult {
                    request,
                    server,
                    chats,
                }
            }
            server_tag::NEW_CHAT_RESULT => ServerCommand::NewChatResult {
                request: RequestId(r.u64()?),
                ok: r.flag()?,
            },
            server_tag::SUBSCRIBE_RESULT => {
                let request = RequestId(r.u64()?);
                let ok = r.flag()?;
                let mut messages = Vec::new();
                if ok {
                    let count = r.u64()?;
                    for _ in 0..count {
                        messages.push(read_message(&mut r)?);
                    }
                }
                ServerCommand::SubscribeResult {
                    request,
                    ok,
                    messages,
                }
            }
            server_tag::MESSAGE => ServerCommand::Message {
                subscription: RequestId(r.u64()?),
                message: read_message(&mut r)?,
            },
            server_tag::MESSAGE_RECEIPT => {
                let request = RequestId(r.u64()?);
                let ok = r.flag()?;
                let error = r.string()?;
                ServerCommand::MessageReceipt {
                    request,
                    ok,
                    error: (!error.is_empty()).then_some(error),
                }
            }
            server_tag::HEARTBEAT => ServerCommand::Heartbeat,
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok((cmd, r.position()))
    }
}

fn put_message(dst: &mut BytesMut, message: &Message) -> Result<(), CodecError> {
    put_u64(dst, message.id);
    put_u8(dst, message.kind.as_byte());
    put_string(dst, &message.text)?;
    put_string(dst, &message.sender)?;
    put_blob(dst, message.raw.as_deref());
    Ok(())
}

fn read_kind(r: &mut Reader<'_>) -> Result<MessageType, CodecError> {
    let b = r.u8()?;
    MessageType::from_byte(b).ok_or(CodecError::UnknownMessageType(b))
}

fn read_message(r: &mut Reader<'_>) -> Result<Message, CodecError> {
    let id = r.u64()?;
    let kind = read_kind(r)?;
    Ok(Message {
        kind,
        id,
        text: r.string()?,
        sender: r.string()?,
        raw: r.blob()?,
    })
}
