//! Framed message channel over a byte stream.
//!
//! Wraps a stream with the length-prefixed frame codec and, once the
//! handshake has agreed a key, the sealed envelope. Both the router and
//! its test peers drive the same type; which message enum flows through
//! is decided per call.

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RouterError;
use rondo_proto::{decode_frame, encode_frame, encode_message, ProtoError, SessionCrypto};

/// Read chunk size for the channel's accumulating buffer.
const READ_CHUNK: usize = 8 * 1024;

/// A framed, optionally sealed message channel.
pub struct Channel<S> {
    stream: S,
    read_buf: BytesMut,
    crypto: Option<SessionCrypto>,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            crypto: None,
        }
    }

    /// Switch the channel into sealed mode. Every frame after this call
    /// is encrypted on send and decrypted on receive.
    pub fn enable_crypto(&mut self, crypto: SessionCrypto) {
        self.crypto = Some(crypto);
    }

    pub fn is_sealed(&self) -> bool {
        self.crypto.is_some()
    }

    /// Serialize, seal if enabled, frame, and write one message.
    pub async fn send<M: Serialize>(&mut self, msg: &M) -> Result<(), RouterError> {
        let body = encode_message(msg)?;
        let body = match &mut self.crypto {
            Some(crypto) => crypto.seal(&body).map_err(ProtoError::Seal)?,
            None => body,
        };
        let mut out = BytesMut::new();
        encode_frame(&body, &mut out).map_err(ProtoError::Frame)?;
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one message, blocking until a full frame is available.
    ///
    /// A clean EOF between frames surfaces as [`RouterError::ConnectionClosed`];
    /// EOF inside a frame is an I/O error.
    pub async fn recv<M: DeserializeOwned>(&mut self) -> Result<M, RouterError> {
        loop {
            if let Some(frame) = decode_frame(&mut self.read_buf).map_err(ProtoError::Frame)? {
                let body = match &mut self.crypto {
                    Some(crypto) => crypto.open(&frame).map_err(ProtoError::Seal)?,
                    None => frame.to_vec(),
                };
                let msg = bincode::deserialize(&body)
                    .map_err(|e| ProtoError::Decode(e.to_string()))?;
                return Ok(msg);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Err(RouterError::ConnectionClosed);
                }
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
        }
    }

    /// Give the stream back, dropping any buffered bytes.
    pub fn into_inner(self) -> S {
        self.stream
    }
}
