//! Connections and length prefixed bincode frames.
//!
//! Negotiation exchanges single raw bytes. Protocols exchange frames: a
//! big-endian `u32` length followed by the bincode encoding of a message.

use crate::error::{NetworkError, Result};
use hashweave_types::NodeId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Any bidirectional byte stream: TCP in production, duplex pipes in tests.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

pub struct FrameReader {
    inner: ReadHalf<BoxedStream>,
    max_frame_bytes: u32,
}

pub struct FrameWriter {
    inner: WriteHalf<BoxedStream>,
}

impl FrameReader {
    pub async fn read_byte(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8().await?)
    }

    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T> {
        let len = self.inner.read_u32().await?;
        if len > self.max_frame_bytes {
            return Err(NetworkError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf).await?;
        Ok(bincode::deserialize(&buf)?)
    }
}

impl FrameWriter {
    pub async fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.inner.write_u8(byte).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Queue a frame without flushing.
    pub async fn write_frame<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let bytes = bincode::serialize(message)?;
        let len = u32::try_from(bytes.len()).map_err(|_| NetworkError::FrameTooLarge(u32::MAX))?;
        self.inner.write_u32(len).await?;
        self.inner.write_all(&bytes).await?;
        Ok(())
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        self.write_frame(message).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }
}

/// An identified connection to one peer.
pub struct Connection {
    peer: NodeId,
    pub reader: FrameReader,
    pub writer: FrameWriter,
}

impl Connection {
    pub fn new(peer: NodeId, stream: BoxedStream, max_frame_bytes: u32) -> Self {
        let (reader, writer) = split(stream);
        Self {
            peer,
            reader: FrameReader {
                inner: reader,
                max_frame_bytes,
            },
            writer: FrameWriter { inner: writer },
        }
    }

    /// Exchange node ids over a fresh stream.
    pub async fn handshake(stream: BoxedStream, self_id: NodeId, max_frame_bytes: u32) -> Result<Self> {
        let mut connection = Self::new(NodeId(u64::MAX), stream, max_frame_bytes);
        connection.writer.inner.write_u64(self_id.0).await?;
        connection.writer.flush().await?;
        connection.peer = NodeId(connection.reader.inner.read_u64().await?);
        Ok(connection)
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        self.writer.send(message).await
    }

    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.reader.read_frame().await
    }

    /// Send `message` while receiving the peer's message of the same phase.
    pub async fn exchange<S: Serialize + Sync, R: DeserializeOwned>(&mut self, message: &S) -> Result<R> {
        let (sent, received) = tokio::join!(self.writer.send(message), self.reader.read_frame::<R>());
        sent?;
        received
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

/// Two connected in-memory endpoints, for tests and simulations.
pub fn connected_pair(a: NodeId, b: NodeId, buffer: usize, max_frame_bytes: u32) -> (Connection, Connection) {
    let (left, right) = tokio::io::duplex(buffer);
    (
        Connection::new(b, Box::new(left), max_frame_bytes),
        Connection::new(a, Box::new(right), max_frame_bytes),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashweave_types::Hash;

    #[tokio::test]
    async fn frames_cross_the_connection() {
        let (mut a, mut b) = connected_pair(NodeId(1), NodeId(2), 64, 1024);
        assert_eq!(a.peer(), NodeId(2));
        assert_eq!(b.peer(), NodeId(1));
        let hash = Hash::digest(b"frame");
        let message = (7u64, hash);
        let (sent, received) = tokio::join!(a.send(&message), b.receive::<(u64, Hash)>());
        sent.unwrap();
        assert_eq!(received.unwrap(), (7, hash));
    }

    #[tokio::test]
    async fn exchange_does_not_deadlock_on_small_buffers() {
        let (mut a, mut b) = connected_pair(NodeId(1), NodeId(2), 16, 1 << 20);
        let big = vec![3u8; 4096];
        let (from_b, from_a) = tokio::join!(a.exchange::<_, Vec<u8>>(&big), b.exchange::<_, Vec<u8>>(&big));
        assert_eq!(from_b.unwrap(), big);
        assert_eq!(from_a.unwrap(), big);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = connected_pair(NodeId(1), NodeId(2), 4096, 8);
        let payload = vec![0u8; 64];
        let (_, received) = tokio::join!(a.send(&payload), b.receive::<Vec<u8>>());
        assert!(matches!(received, Err(NetworkError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn handshake_learns_peer_id() {
        let (left, right) = tokio::io::duplex(64);
        let (a, b) = tokio::join!(
            Connection::handshake(Box::new(left), NodeId(4), 1024),
            Connection::handshake(Box::new(right), NodeId(9), 1024)
        );
        assert_eq!(a.unwrap().peer(), NodeId(9));
        assert_eq!(b.unwrap().peer(), NodeId(4));
    }
}
