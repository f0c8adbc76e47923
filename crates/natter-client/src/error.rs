use thiserror::Error;

use natter_shared::CodecError;
use natter_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Not connected")]
    NotConnected,

    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("Worker thread failed to start: {0}")]
    WorkerStart(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
