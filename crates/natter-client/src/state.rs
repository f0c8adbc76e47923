//! Connection state published by the worker loop.

use std::fmt;

/// Lifecycle of the single server connection.
///
/// `Disconnected -> Connecting -> Introduced -> ListingChats -> Idle -> Subscribed`
///
/// Subscriptions are only ever replaced, never cancelled, so `Subscribed`
/// lasts until the connection is dropped. Any state can fall back to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// `Introduce` written.
    Introduced,
    /// Waiting for the chat list that completes the handshake.
    ListingChats,
    Idle,
    /// At least one subscription is active.
    Subscribed,
}

impl ConnectionState {
    /// `true` once the chat list has been received.
    pub fn is_ready(self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Introduced => "introduced",
            ConnectionState::ListingChats => "listing-chats",
            ConnectionState::Idle => "idle",
            ConnectionState::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}
