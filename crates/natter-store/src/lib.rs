//! # natter-store
//!
//! Local cache of chats and messages synchronized from natter servers.
//!
//! Rows are namespaced by the [`ServerIdentity`](natter_shared::ServerIdentity)
//! a server announces on handshake, so data from different servers never
//! collides. The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection`; it is owned by the client's worker thread and is
//! never shared.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod servers;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
