//! Length-prefixed frame codec shared by every transport.
//!
//! Wire format:
//! ```text
//! [len:1|2|4][id:1|2|4][body:N]
//! ```
//! `len` counts the body only (it excludes both its own bytes and the id
//! prefix).  The id prefix is produced and consumed by the [`Router`]; the
//! codec carries it through untouched.  Field widths and byte order are fixed
//! when the [`FrameParser`] is built and never change afterwards.
//!
//! # Why the id bytes are not counted (for beginners)
//!
//! The router's `marshal` already emits `id + body`, so the codec only has to
//! subtract the id width to obtain the length field.  On the way in, the codec
//! reads `len + id_width` bytes and hands the whole slice to `unmarshal`, which
//! knows how to interpret the id.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::router::{RouteError, Router};

/// Errors raised while framing or unframing a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A field width other than 1, 2 or 4 bytes was requested.
    #[error("invalid field width: {0} (expected 1, 2 or 4)")]
    InvalidWidth(u8),

    /// The length field exceeds the configured maximum for this parser.
    #[error("frame too large: length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u64, max: u64 },

    /// The stream ended before the expected number of bytes arrived.
    #[error("truncated {section}: expected {expected} bytes")]
    Truncated {
        section: &'static str,
        expected: usize,
    },

    /// The marshalled payload is shorter than the id prefix.
    #[error("payload of {len} bytes is shorter than the {id_width}-byte id prefix")]
    MissingId { len: usize, id_width: usize },

    /// A value does not fit in its fixed-width field.
    #[error("value {value} does not fit in field (max {max})")]
    Overflow { value: u64, max: u64 },

    /// The underlying link failed for a reason other than end-of-stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The router failed to marshal or unmarshal the payload.
    #[error("codec error: {0}")]
    Codec(#[from] RouteError),
}

// ── Field layout ──────────────────────────────────────────────────────────────

/// Width of a fixed-size unsigned header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldWidth {
    One,
    Two,
    Four,
}

impl FieldWidth {
    /// All supported widths, smallest first.
    pub const ALL: [FieldWidth; 3] = [FieldWidth::One, FieldWidth::Two, FieldWidth::Four];

    /// Number of bytes the field occupies on the wire.
    pub const fn bytes(self) -> usize {
        match self {
            FieldWidth::One => 1,
            FieldWidth::Two => 2,
            FieldWidth::Four => 4,
        }
    }

    /// Largest value representable in this width: `2^(8 * bytes) - 1`.
    pub const fn max_value(self) -> u64 {
        match self {
            FieldWidth::One => u8::MAX as u64,
            FieldWidth::Two => u16::MAX as u64,
            FieldWidth::Four => u32::MAX as u64,
        }
    }

    /// Reads an unsigned value from the first `self.bytes()` bytes of `src`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if `src` is too short.
    pub fn read(self, order: ByteOrder, src: &[u8]) -> Result<u64, ProtocolError> {
        if src.len() < self.bytes() {
            return Err(ProtocolError::Truncated {
                section: "field",
                expected: self.bytes(),
            });
        }
        let value = match (self, order) {
            (FieldWidth::One, _) => u64::from(src[0]),
            (FieldWidth::Two, ByteOrder::BigEndian) => u64::from(u16::from_be_bytes([src[0], src[1]])),
            (FieldWidth::Two, ByteOrder::LittleEndian) => {
                u64::from(u16::from_le_bytes([src[0], src[1]]))
            }
            (FieldWidth::Four, ByteOrder::BigEndian) => {
                u64::from(u32::from_be_bytes([src[0], src[1], src[2], src[3]]))
            }
            (FieldWidth::Four, ByteOrder::LittleEndian) => {
                u64::from(u32::from_le_bytes([src[0], src[1], src[2], src[3]]))
            }
        };
        Ok(value)
    }

    /// Appends `value` to `dst` using this width and `order`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Overflow`] if `value` exceeds [`Self::max_value`].
    /// The value is never truncated or wrapped.
    pub fn write(self, order: ByteOrder, value: u64, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if value > self.max_value() {
            return Err(ProtocolError::Overflow {
                value,
                max: self.max_value(),
            });
        }
        match (self, order) {
            (FieldWidth::One, _) => dst.push(value as u8),
            (FieldWidth::Two, ByteOrder::BigEndian) => {
                dst.extend_from_slice(&(value as u16).to_be_bytes())
            }
            (FieldWidth::Two, ByteOrder::LittleEndian) => {
                dst.extend_from_slice(&(value as u16).to_le_bytes())
            }
            (FieldWidth::Four, ByteOrder::BigEndian) => {
                dst.extend_from_slice(&(value as u32).to_be_bytes())
            }
            (FieldWidth::Four, ByteOrder::LittleEndian) => {
                dst.extend_from_slice(&(value as u32).to_le_bytes())
            }
        }
        Ok(())
    }
}

impl TryFrom<u8> for FieldWidth {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FieldWidth::One),
            2 => Ok(FieldWidth::Two),
            4 => Ok(FieldWidth::Four),
            other => Err(ProtocolError::InvalidWidth(other)),
        }
    }
}

/// Byte order of multi-byte header fields.  Irrelevant for 1-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Maps the conventional `little_endian` configuration flag to a byte order.
    pub const fn from_little_endian(little_endian: bool) -> Self {
        if little_endian {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Immutable frame codec configuration.
///
/// A parser is cheap to copy and safe to share: every method takes `&self`
/// and keeps no per-call state, so one instance serves every connection of a
/// server concurrently.
///
/// # Examples
///
/// ```rust
/// use gate_core::protocol::codec::{ByteOrder, FieldWidth, FrameParser};
///
/// let parser = FrameParser::new(FieldWidth::Two, FieldWidth::Two, ByteOrder::BigEndian);
/// // id 0x0001 followed by a 3-byte body
/// let frame = parser.encode_frame(&[0x00, 0x01, b'a', b'b', b'c']).unwrap();
/// assert_eq!(frame, vec![0x00, 0x03, 0x00, 0x01, b'a', b'b', b'c']);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParser {
    len_width: FieldWidth,
    id_width: FieldWidth,
    order: ByteOrder,
    max_len: u64,
}

impl FrameParser {
    /// Creates a parser whose length cap is the largest value `len_width` can hold.
    pub const fn new(len_width: FieldWidth, id_width: FieldWidth, order: ByteOrder) -> Self {
        Self {
            len_width,
            id_width,
            order,
            max_len: len_width.max_value(),
        }
    }

    /// Builds a parser from raw byte counts as they appear in configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidWidth`] if either width is not 1, 2 or 4.
    pub fn from_widths(len_msg_len: u8, len_msg_id: u8, little_endian: bool) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            FieldWidth::try_from(len_msg_len)?,
            FieldWidth::try_from(len_msg_id)?,
            ByteOrder::from_little_endian(little_endian),
        ))
    }

    /// Lowers the accepted length below the width maximum.
    ///
    /// Values above the width maximum are clamped to it.
    pub fn with_max_len(mut self, max_len: u64) -> Self {
        self.max_len = max_len.min(self.len_width.max_value());
        self
    }

    pub fn len_width(&self) -> FieldWidth {
        self.len_width
    }

    pub fn id_width(&self) -> FieldWidth {
        self.id_width
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Largest accepted value of the length field.
    pub fn max_len(&self) -> u64 {
        self.max_len
    }

    /// Appends the length header for a body of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] if `len` exceeds [`Self::max_len`].
    pub fn put_len(&self, len: u64, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if len > self.max_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }
        self.len_width.write(self.order, len, dst)
    }

    // ── Stream transports ─────────────────────────────────────────────────────

    /// Reads exactly one frame from `reader` and returns `id + body`.
    ///
    /// The length header is validated before any payload byte is read, so an
    /// oversized declaration never causes an allocation of that size.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooLarge`] if the declared length exceeds the cap.
    /// - [`ProtocolError::Truncated`] if the stream ends mid-frame.
    /// - [`ProtocolError::Io`] for any other read failure.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Vec<u8>, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 4];
        let header = &mut header[..self.len_width.bytes()];
        reader
            .read_exact(header)
            .await
            .map_err(|e| short_read(e, "length", self.len_width.bytes()))?;

        let len = self.len_width.read(self.order, header)?;
        if len > self.max_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }

        let total = len as usize + self.id_width.bytes();
        let mut payload = vec![0u8; total];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| short_read(e, "payload", total))?;
        Ok(payload)
    }

    /// Reads one frame and decodes it with the router's `unmarshal`.
    ///
    /// # Errors
    ///
    /// Any [`Self::read_frame`] error, or [`ProtocolError::Codec`] if the
    /// router rejects the payload.
    pub async fn read_msg<M, R>(
        &self,
        router: &dyn Router<Message = M>,
        reader: &mut R,
    ) -> Result<M, ProtocolError>
    where
        M: Send + 'static,
        R: AsyncRead + Unpin + ?Sized,
    {
        let payload = self.read_frame(reader).await?;
        Ok(router.unmarshal(&payload)?)
    }

    /// Prefixes an already-marshalled `id + body` payload with its length header.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingId`] if `data` is shorter than the id width.
    /// - [`ProtocolError::FrameTooLarge`] if the body exceeds the length cap.
    pub fn encode_frame(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let body_len = self.body_len(data)?;
        let mut buf = Vec::with_capacity(self.len_width.bytes() + data.len());
        self.put_len(body_len, &mut buf)?;
        buf.extend_from_slice(data);
        Ok(buf)
    }

    /// Marshals `msg` with the router and frames it for a stream transport.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Codec`] if marshalling fails, otherwise any
    /// [`Self::encode_frame`] error.
    pub fn write_msg<M>(&self, router: &dyn Router<Message = M>, msg: &M) -> Result<Vec<u8>, ProtocolError>
    where
        M: Send + 'static,
    {
        let data = router.marshal(msg)?;
        self.encode_frame(&data)
    }

    // ── Message transports ────────────────────────────────────────────────────

    /// Validates and decodes one `id + body` payload that arrived as a whole
    /// transport message (no length header on the wire).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingId`], [`ProtocolError::FrameTooLarge`], or
    /// [`ProtocolError::Codec`] from the router.
    pub fn unmarshal_payload<M>(&self, router: &dyn Router<Message = M>, data: &[u8]) -> Result<M, ProtocolError>
    where
        M: Send + 'static,
    {
        self.body_len(data)?;
        Ok(router.unmarshal(data)?)
    }

    /// Marshals `msg` for a message-oriented transport: `id + body`, no header.
    ///
    /// # Errors
    ///
    /// Same as [`Self::unmarshal_payload`].
    pub fn marshal_payload<M>(&self, router: &dyn Router<Message = M>, msg: &M) -> Result<Vec<u8>, ProtocolError>
    where
        M: Send + 'static,
    {
        let data = router.marshal(msg)?;
        self.body_len(&data)?;
        Ok(data)
    }

    fn body_len(&self, data: &[u8]) -> Result<u64, ProtocolError> {
        let id_width = self.id_width.bytes();
        let body_len = data.len().checked_sub(id_width).ok_or(ProtocolError::MissingId {
            len: data.len(),
            id_width,
        })? as u64;
        if body_len > self.max_len {
            return Err(ProtocolError::FrameTooLarge {
                len: body_len,
                max: self.max_len,
            });
        }
        Ok(body_len)
    }
}

impl Default for FrameParser {
    /// `[len:2][id:2]`, big-endian.
    fn default() -> Self {
        Self::new(FieldWidth::Two, FieldWidth::Two, ByteOrder::BigEndian)
    }
}

fn short_read(err: io::Error, section: &'static str, expected: usize) -> ProtocolError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Truncated { section, expected }
    } else {
        ProtocolError::Io(err)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
