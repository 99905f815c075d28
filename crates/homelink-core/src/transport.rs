//! Connection: a byte stream viewed as a sequence of envelopes.
//!
//! # Why a framing layer is needed
//!
//! TCP is a *stream* protocol.  A single `read()` may return half a line, or
//! three lines at once.  [`Connection`] buffers incoming bytes, splits them on
//! `\n` with `tokio_util`'s `LinesCodec`, and decodes each complete line with
//! [`decode_envelope`].  Outbound envelopes are encoded and written with a
//! trailing newline.
//!
//! # Error classes
//!
//! [`TransportError::is_recoverable`] separates problems with *one line*
//! (bad JSON, oversized line) from problems with *the connection* (socket
//! reset, invalid UTF-8).  Handlers answer the first kind with an
//! `ERRO malformed_envelope` and keep reading; the second kind ends the
//! connection.
//!
//! The stream type is generic so tests can drive a `Connection` over an
//! in-memory `tokio::io::duplex` pipe instead of a real socket.

use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tracing::trace;

use crate::protocol::codec::{decode_envelope, encode_envelope, CodecError};
use crate::protocol::envelope::Envelope;

/// Longest accepted line, in bytes, unless configured otherwise.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Errors surfaced by [`Connection`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// One line could not be decoded into an envelope.
    #[error(transparent)]
    Malformed(#[from] CodecError),

    /// One line exceeded the maximum length and was discarded.
    #[error("malformed envelope: line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The underlying stream failed (reset, broken pipe, invalid UTF-8).
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// `true` when the connection is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::LineTooLong { .. })
    }
}

// ── Line codec ────────────────────────────────────────────────────────────────

/// One unit produced by the line decoder.
#[derive(Debug)]
enum RawLine {
    Line(String),
    TooLong,
}

/// `LinesCodec` that reports oversized lines as an item instead of an error.
///
/// `Framed` pauses the stream after any decoder error, which would look like
/// end-of-input to the caller.  Surfacing the oversized line as a value keeps
/// the connection alive while `LinesCodec` discards the rest of that line.
#[derive(Debug)]
struct EnvelopeLines {
    inner: LinesCodec,
}

impl EnvelopeLines {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
        }
    }

    fn lift(result: Result<Option<String>, LinesCodecError>) -> Result<Option<RawLine>, io::Error> {
        match result {
            Ok(line) => Ok(line.map(RawLine::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(RawLine::TooLong)),
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for EnvelopeLines {
    type Item = RawLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawLine>, io::Error> {
        Self::lift(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RawLine>, io::Error> {
        Self::lift(self.inner.decode_eof(src))
    }
}

impl Encoder<String> for EnvelopeLines {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => {
                io::Error::new(io::ErrorKind::InvalidInput, "outbound line too long")
            }
        })
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// A bidirectional envelope stream over one socket.
///
/// The connection is exclusively owned by whoever drives it (a broker
/// connection handler, a lamp session, a panel client).  Nothing else ever
/// reads from or writes to the socket.
pub struct Connection<S = TcpStream> {
    framed: Framed<S, EnvelopeLines>,
    max_line_bytes: usize,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to `addr` with the default line limit.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the TCP handshake fails.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        // Envelopes are tiny; don't let Nagle hold a reply back.
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps `stream` with the default line limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_line_bytes(stream, DEFAULT_MAX_LINE_BYTES)
    }

    /// Wraps `stream`, rejecting lines longer than `max_line_bytes`.
    pub fn with_max_line_bytes(stream: S, max_line_bytes: usize) -> Self {
        Self {
            framed: Framed::new(stream, EnvelopeLines::new(max_line_bytes)),
            max_line_bytes,
        }
    }

    /// Receives the next envelope.
    ///
    /// Returns `None` once the peer has closed the stream.  Blank lines are
    /// skipped silently.
    pub async fn recv(&mut self) -> Option<Result<Envelope, TransportError>> {
        loop {
            let raw = match self.framed.next().await? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(TransportError::Io(e))),
            };

            match raw {
                RawLine::Line(line) if line.trim().is_empty() => continue,
                RawLine::Line(line) => {
                    trace!("recv line: {line}");
                    return Some(decode_envelope(&line).map_err(TransportError::from));
                }
                RawLine::TooLong => {
                    return Some(Err(TransportError::LineTooLong {
                        limit: self.max_line_bytes,
                    }))
                }
            }
        }
    }

    /// Encodes and writes `envelope`, flushing it to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the write fails.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let line = encode_envelope(envelope)?;
        trace!("send line: {line}");
        self.framed.send(line).await?;
        Ok(())
    }

    /// Returns the wrapped stream.  Buffered but unread input is discarded.
    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
