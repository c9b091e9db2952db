//! Framed field codec shared by every minidfs connection
//!
//! Field encoding:
//! - opcode: 1 byte
//! - string: u16 big-endian byte length, then UTF-8 bytes
//! - i32 / i64: fixed-width big-endian
//! - bool: 1 byte, 0 or 1
//! - bytes: i64 big-endian length, then raw bytes
//!
//! Every response starts with an i32 status: `0` then the payload, or a
//! negative code then one message string.

use crate::common::error::STATUS_OK;
use crate::common::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest byte payload accepted in one frame (1 GiB)
pub const MAX_PAYLOAD: i64 = 1 << 30;

/// Builds one outgoing frame in memory, then writes it in a single call.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request frame with its opcode
    pub fn request(opcode: u8) -> Self {
        let mut w = Self::new();
        w.put_u8(opcode);
        w
    }

    /// Start a success response
    pub fn ok() -> Self {
        let mut w = Self::new();
        w.put_i32(STATUS_OK);
        w
    }

    /// A complete error response for `err`
    pub fn error(err: &Error) -> Self {
        let mut w = Self::new();
        w.put_i32(err.status_code());
        let mut message = err.to_string();
        if message.len() > u16::MAX as usize {
            let mut cut = u16::MAX as usize;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        // Fits by construction
        let _ = w.put_str(&message);
        w
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32(v);
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64(v);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.buf.put_u8(v as u8);
        self
    }

    pub fn put_str(&mut self, s: &str) -> Result<&mut Self> {
        let len = u16::try_from(s.len())
            .map_err(|_| Error::Protocol(format!("string field too long: {} bytes", s.len())))?;
        self.buf.put_u16(len);
        self.buf.put_slice(s.as_bytes());
        Ok(self)
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> Result<&mut Self> {
        let len = i64::try_from(data.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD)
            .ok_or_else(|| Error::Protocol(format!("payload too large: {} bytes", data.len())))?;
        self.buf.put_i64(len);
        self.buf.put_slice(data);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Write the frame and flush
    pub async fn send<W: AsyncWrite + Unpin>(self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Reads typed fields off a byte stream.
///
/// A stream that ends mid-field is a protocol error: the frame is malformed.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::Protocol("truncated frame".into()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.fill(&mut b).await?;
        Ok(b[0])
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.fill(&mut b).await?;
        Ok(i32::from_be_bytes(b))
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.fill(&mut b).await?;
        Ok(i64::from_be_bytes(b))
    }

    pub async fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8().await? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Protocol(format!("invalid bool byte: {}", other))),
        }
    }

    pub async fn read_str(&mut self) -> Result<String> {
        let mut len = [0u8; 2];
        self.fill(&mut len).await?;
        let mut data = vec![0u8; u16::from_be_bytes(len) as usize];
        self.fill(&mut data).await?;
        String::from_utf8(data).map_err(|_| Error::Protocol("string field is not UTF-8".into()))
    }

    pub async fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_i64().await?;
        if !(0..=MAX_PAYLOAD).contains(&len) {
            return Err(Error::Protocol(format!("invalid payload length: {}", len)));
        }
        let mut data = vec![0u8; len as usize];
        self.fill(&mut data).await?;
        Ok(data)
    }

    /// Read a non-negative i32 count
    pub async fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32().await?;
        usize::try_from(count).map_err(|_| Error::Protocol(format!("negative count: {}", count)))
    }

    /// Read the response status; an error status becomes `Err` carrying its message
    pub async fn read_status(&mut self) -> Result<()> {
        let status = self.read_i32().await?;
        if status == STATUS_OK {
            return Ok(());
        }
        let message = self.read_str().await?;
        Err(Error::from_status(status, message))
    }
}
