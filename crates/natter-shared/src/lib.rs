//! Types, wire codec and protocol commands shared by the natter crates.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::CodecError;
pub use protocol::{ClientCommand, ServerCommand};
pub use types::{Chat, Message, MessageType, OutgoingMessage, RequestId, ServerIdentity};
