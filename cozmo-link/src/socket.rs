//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::frame::Frame`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.
//!
//! One socket is shared (behind an `Arc`) by the two transport workers: the
//! send worker only calls [`Socket::send_frame`], the receive worker only
//! calls [`Socket::recv_frame`].  Both take `&self`, so no lock is needed.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::frame::{Frame, FrameError};

/// Largest datagram we are prepared to read.
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A datagram arrived but could not be decoded as a frame.
    #[error("undecodable {len}-byte datagram from {from}: {source}")]
    Frame {
        #[source]
        source: FrameError,
        from: SocketAddr,
        len: usize,
    },
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, frame-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `frame` and send it as a single datagram to `dest`.
    ///
    /// Returns the number of bytes written.
    pub async fn send_frame(&self, frame: &Frame, dest: SocketAddr) -> Result<usize, SocketError> {
        let bytes = frame.to_bytes();
        Ok(self.inner.send_to(&bytes, dest).await?)
    }

    /// Receive the next datagram and decode it into a [`Frame`].
    ///
    /// Returns `(frame, sender_address, datagram_len)`.  Datagrams that fail
    /// to decode come back as [`SocketError::Frame`] carrying the sender, so
    /// the caller can log and keep reading.
    pub async fn recv_frame(&self) -> Result<(Frame, SocketAddr, usize), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = self.inner.recv_from(&mut buf).await?;
        let frame = Frame::from_bytes(&buf[..n]).map_err(|source| SocketError::Frame {
            source,
            from,
            len: n,
        })?;
        Ok((frame, from, n))
    }
}
