//! TCP connection to a natter server with inbound frame buffering.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use natter_shared::{ClientCommand, CodecError, ServerCommand};

use crate::error::{ClientError, Result};

const READ_CHUNK: usize = 4096;

/// Bytes dropped after an undecodable frame.
#[derive(Debug)]
pub struct DiscardedFrame {
    pub error: CodecError,
    pub discarded: usize,
}

pub struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buf: BytesMut,
    peer: SocketAddr,
    max_field_len: usize,
}

impl Connection {
    /// Connect to `addr` (`host:port`), giving up after `timeout`.
    pub async fn open(addr: &str, timeout: Duration, max_field_len: usize) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))??;

        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader,
            writer,
            buf: BytesMut::with_capacity(READ_CHUNK),
            peer,
            max_field_len,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, cmd: &ClientCommand) -> Result<()> {
        let bytes = cmd.to_bytes()?;
        self.writer.write_all(&bytes).await?;
        tracing::trace!(tag = cmd.tag(), len = bytes.len(), "frame sent");
        Ok(())
    }

    /// Wait until the socket is readable and append what arrived to the
    /// frame buffer. `Ok(0)` means the server closed the connection.
    ///
    /// Cancel safe: nothing is lost if the future is dropped.
    pub async fn read_more(&mut self) -> io::Result<usize> {
        self.buf.reserve(READ_CHUNK);
        self.reader.read_buf(&mut self.buf).await
    }

    /// Pop one complete frame off the buffer.
    ///
    /// `Ok(None)` means the buffered bytes do not yet form a whole frame.
    /// On a decode error the whole buffer is dropped: frames carry no
    /// length prefix, so there is no boundary to skip to.
    pub fn next_frame(&mut self) -> std::result::Result<Option<ServerCommand>, DiscardedFrame> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        match ServerCommand::decode(&self.buf, self.max_field_len) {
            Ok((cmd, used)) => {
                self.buf.advance(used);
                Ok(Some(cmd))
            }
            Err(e) if e.is_incomplete() => Ok(None),
            Err(error) => {
                let discarded = self.buf.len();
                self.buf.clear();
                Err(DiscardedFrame { error, discarded })
            }
        }
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Turn a connect target into `host:port`, appending `default_port` when the
/// target names none.
pub fn resolve_target(target: &str, default_port: u16) -> String {
    let target = target.trim();

    if target.parse::<SocketAddr>().is_ok() {
        return target.to_string();
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }

    let has_port = target.rsplit_once(':').is_some_and(|(host, port)| {
        !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok()
    });

    if has_port {
        target.to_string()
    } else {
        format!("{target}:{default_port}")
    }
}
