use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::{MAX_MESSAGE_SIZE, READ_BUFFER_SIZE};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Framed reads and writes over a peer's TCP stream.
///
/// Partially read frames stay in an internal buffer, so
/// [`receive_message`](Self::receive_message) can be dropped mid-read (for
/// example as one branch of `select!`) without losing data.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    max_frame: usize,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            max_frame: MAX_MESSAGE_SIZE,
        }
    }

    /// Frames longer than `max_frame` bytes are rejected before they are read.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Sends our handshake and reads the peer's, both within `limit`.
    pub async fn handshake(
        &mut self,
        ours: &Handshake,
        limit: Duration,
    ) -> Result<Handshake, PeerError> {
        timeout(limit, async {
            self.stream.write_all(&ours.encode()).await?;
            self.fill_to(HANDSHAKE_LEN).await?;
            let data = self.read_buf.split_to(HANDSHAKE_LEN);
            Handshake::decode(&data)
        })
        .await
        .map_err(|_| PeerError::Timeout)?
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        timeout(WRITE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads the next message. Has no deadline of its own; callers race it
    /// against their timers.
    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill_to(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > self.max_frame {
            return Err(PeerError::MessageLength(format!(
                "frame of {} bytes exceeds limit of {}",
                length, self.max_frame
            )));
        }

        let total_len = 4 + length;
        self.fill_to(total_len).await?;

        let frame = self.read_buf.split_to(total_len);
        Message::decode(frame.freeze())
    }

    async fn fill_to(&mut self, len: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < len {
            self.read_buf.reserve(len - self.read_buf.len());
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }

    /// Closes our side of the connection after flushing pending writes.
    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
