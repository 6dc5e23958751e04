//! Framed packet I/O over one connection.
//!
//! A [`Transport`] owns a byte stream and moves whole [`Packet`]s across it:
//! `send` writes one length-prefixed frame, `recv` reads exactly one.
//! The `&mut self` receivers keep at most one read and one write in flight.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use vici_protocol::{FramedMessage, Packet, ProtocolError};

use crate::error::Result;

/// Bytes reserved in the read buffer before each read.
const READ_CHUNK: usize = 4096;

/// A full-duplex byte stream the transport can own.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// Type-erased stream, so Unix sockets and in-memory pipes share one type.
pub type BoxedStream = Box<dyn Stream>;

/// Sends and receives framed packets.
pub struct Transport {
    stream: BoxedStream,
    read_buf: Vec<u8>,
    max_frame_size: usize,
    closed: bool,
}

impl Transport {
    /// Wrap a connected stream.
    pub fn new(stream: impl Stream + 'static) -> Self {
        Self {
            stream: Box::new(stream),
            read_buf: Vec::new(),
            max_frame_size: FramedMessage::MAX_SIZE,
            closed: false,
        }
    }

    /// Change the largest frame `send` and `recv` accept.
    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Write one packet as a single frame.
    ///
    /// Not cancel safe: a partially written frame cannot be resynchronized,
    /// so the connection must be closed after a failed or aborted send.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        if self.closed {
            return Err(not_connected().into());
        }

        let payload = packet.encode()?;
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        let frame = FramedMessage::frame(&payload)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        trace!(
            packet_type = %packet.packet_type(),
            name = packet.name(),
            len = payload.len(),
            "Sent packet"
        );
        Ok(())
    }

    /// Read exactly one frame and decode it.
    ///
    /// Blocks until a whole frame has arrived. Cancel safe: bytes of a frame
    /// that is only partially received stay buffered for the next call.
    pub async fn recv(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.take_frame()? {
                trace!(
                    packet_type = %packet.packet_type(),
                    name = packet.name(),
                    "Received packet"
                );
                return Ok(packet);
            }

            if self.closed {
                return Err(not_connected().into());
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )
                .into());
            }
        }
    }

    /// Shut the stream down. Calling this more than once is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.read_buf.clear();

        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Split a complete frame off the front of the read buffer.
    fn take_frame(&mut self) -> Result<Option<Packet>> {
        let Some(len) = FramedMessage::read_length(&self.read_buf) else {
            return Ok(None);
        };

        let len = len as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            }
            .into());
        }

        let end = FramedMessage::HEADER_SIZE + len;
        if self.read_buf.len() < end {
            return Ok(None);
        }

        let packet = Packet::decode(&self.read_buf[FramedMessage::HEADER_SIZE..end]);
        self.read_buf.drain(..end);
        Ok(Some(packet?))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("buffered", &self.read_buf.len())
            .field("max_frame_size", &self.max_frame_size)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}
