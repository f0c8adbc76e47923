//! # natter-client
//!
//! Non-blocking client engine for natter chat servers.
//!
//! Requests made through [`Client`] are queued and return immediately. A
//! dedicated worker thread owns the TCP connection and the local cache,
//! drives the wire protocol and posts finished results back as
//! [`Completion`]s, which the caller runs on its own thread with
//! [`Client::dispatch`].

pub mod client;
pub mod config;
pub mod connection;
mod engine;
pub mod error;
pub mod events;
pub mod state;
pub mod work;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::Completion;
pub use state::ConnectionState;

pub use natter_shared::{Chat, Message, MessageType, OutgoingMessage, ServerIdentity};

use tracing_subscriber::{fmt, EnvFilter};

/// Install a `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("natter_client=debug,natter_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
