use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated field: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Field too large: {len} bytes (max {max})")]
    FieldTooLarge { len: u64, max: usize },

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unknown command tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
}

impl CodecError {
    /// `true` when more bytes could still complete the frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Truncated { .. })
    }
}
