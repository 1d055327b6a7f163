//! Inbound push protocol messages and their binary framing.
//!
//! After accepting a serve-file request the source pushes a transfer as:
//!
//! ```text
//! FileMeta(reference, session, encoding, compression, filename, length)
//!     FilePart(session, 0, bytes)
//!     FilePart(session, 1, bytes)
//!     ...
//! FileEof(session, xxhash, error code, error message)
//! ```
//!
//! Small payloads skip the chunked exchange and arrive as a single
//! [`FileBlob`].
//!
//! # Frame layout
//!
//! One tag byte followed by the fields in declaration order. Integers are
//! big-endian, strings are a `u16` length plus UTF-8 bytes, and payloads are
//! a `u32` length plus raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::codec::{CompressionType, EncodingType};
use crate::reference::{FileReference, SessionId};

const TAG_META: u8 = 1;
const TAG_PART: u8 = 2;
const TAG_EOF: u8 = 3;
const TAG_BLOB: u8 = 4;

/// Errors decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unknown frame tag {0}")]
    UnknownTag(u8),

    #[error("field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("unknown encoding type {0:?}")]
    UnknownEncoding(String),

    #[error("unknown compression type {0:?}")]
    UnknownCompression(String),

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("field {0} exceeds its length prefix")]
    FieldTooLong(&'static str),
}

/// Announces a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub reference: FileReference,
    pub session_id: SessionId,
    pub encoding_type: EncodingType,
    pub compression: CompressionType,
    pub filename: String,
    pub total_length: u64,
}

/// One chunk of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub session_id: SessionId,
    pub index: u32,
    pub data: Bytes,
}

/// Terminates a transfer.
///
/// A non-zero `error_code` means the source aborted the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEof {
    pub session_id: SessionId,
    pub xxhash: u64,
    pub error_code: i32,
    pub error_message: String,
}

impl FileEof {
    pub fn ok(session_id: SessionId, xxhash: u64) -> Self {
        Self {
            session_id,
            xxhash,
            error_code: 0,
            error_message: String::new(),
        }
    }
}

/// A whole artifact delivered in one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub reference: FileReference,
    pub encoding_type: EncodingType,
    pub compression: CompressionType,
    pub filename: String,
    pub content: Bytes,
    pub xxhash: u64,
}

/// Any message the source pushes to a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Meta(FileMeta),
    Part(FilePart),
    Eof(FileEof),
    Blob(FileBlob),
}

impl InboundMessage {
    /// Encode into a single frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        match self {
            InboundMessage::Meta(meta) => {
                buf.put_u8(TAG_META);
                put_str(&mut buf, meta.reference.value(), "reference")?;
                buf.put_u64(meta.session_id.value());
                put_str(&mut buf, meta.encoding_type.as_str(), "encoding")?;
                put_str(&mut buf, meta.compression.as_str(), "compression")?;
                put_str(&mut buf, &meta.filename, "filename")?;
                buf.put_u64(meta.total_length);
            }
            InboundMessage::Part(part) => {
                buf.put_u8(TAG_PART);
                buf.put_u64(part.session_id.value());
                buf.put_u32(part.index);
                put_payload(&mut buf, &part.data, "data")?;
            }
            InboundMessage::Eof(eof) => {
                buf.put_u8(TAG_EOF);
                buf.put_u64(eof.session_id.value());
                buf.put_u64(eof.xxhash);
                buf.put_i32(eof.error_code);
                put_str(&mut buf, &eof.error_message, "error message")?;
            }
            InboundMessage::Blob(blob) => {
                buf.put_u8(TAG_BLOB);
                put_str(&mut buf, blob.reference.value(), "reference")?;
                put_str(&mut buf, blob.encoding_type.as_str(), "encoding")?;
                put_str(&mut buf, blob.compression.as_str(), "compression")?;
                put_str(&mut buf, &blob.filename, "filename")?;
                put_payload(&mut buf, &blob.content, "content")?;
                buf.put_u64(blob.xxhash);
            }
        }
        Ok(buf.freeze())
    }

    /// Decode one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = frame;
        let tag = get_u8(&mut buf, "tag")?;

        let message = match tag {
            TAG_META => InboundMessage::Meta(FileMeta {
                reference: FileReference::new(get_str(&mut buf, "reference")?),
                session_id: SessionId::new(get_u64(&mut buf, "session id")?),
                encoding_type: get_encoding(&mut buf)?,
                compression: get_compression(&mut buf)?,
                filename: get_str(&mut buf, "filename")?,
                total_length: get_u64(&mut buf, "total length")?,
            }),
            TAG_PART => InboundMessage::Part(FilePart {
                session_id: SessionId::new(get_u64(&mut buf, "session id")?),
                index: get_u32(&mut buf, "index")?,
                data: get_payload(&mut buf, "data")?,
            }),
            TAG_EOF => InboundMessage::Eof(FileEof {
                session_id: SessionId::new(get_u64(&mut buf, "session id")?),
                xxhash: get_u64(&mut buf, "xxhash")?,
                error_code: get_i32(&mut buf, "error code")?,
                error_message: get_str(&mut buf, "error message")?,
            }),
            TAG_BLOB => InboundMessage::Blob(FileBlob {
                reference: FileReference::new(get_str(&mut buf, "reference")?),
                encoding_type: get_encoding(&mut buf)?,
                compression: get_compression(&mut buf)?,
                filename: get_str(&mut buf, "filename")?,
                content: get_payload(&mut buf, "content")?,
                xxhash: get_u64(&mut buf, "xxhash")?,
            }),
            other => return Err(ProtocolError::UnknownTag(other)),
        };

        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes(buf.remaining()));
        }
        Ok(message)
    }
}

fn put_str(buf: &mut BytesMut, value: &str, field: &'static str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong(field))?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_payload(buf: &mut BytesMut, value: &[u8], field: &'static str) -> Result<(), ProtocolError> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong(field))?;
    buf.put_u32(len);
    buf.put_slice(value);
    Ok(())
}

fn ensure(buf: &[u8], needed: usize, field: &'static str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::Truncated(field))
    } else {
        Ok(())
    }
}

fn get_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, ProtocolError> {
    ensure(*buf, 1, field)?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, ProtocolError> {
    ensure(*buf, 4, field)?;
    Ok(buf.get_u32())
}

fn get_i32(buf: &mut &[u8], field: &'static str) -> Result<i32, ProtocolError> {
    ensure(*buf, 4, field)?;
    Ok(buf.get_i32())
}

fn get_u64(buf: &mut &[u8], field: &'static str) -> Result<u64, ProtocolError> {
    ensure(*buf, 8, field)?;
    Ok(buf.get_u64())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, ProtocolError> {
    ensure(*buf, 2, field)?;
    let len = buf.get_u16() as usize;
    ensure(*buf, len, field)?;
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| ProtocolError::InvalidUtf8(field))?
        .to_string();
    buf.advance(len);
    Ok(value)
}

fn get_payload(buf: &mut &[u8], field: &'static str) -> Result<Bytes, ProtocolError> {
    ensure(*buf, 4, field)?;
    let len = buf.get_u32() as usize;
    ensure(*buf, len, field)?;
    Ok(buf.copy_to_bytes(len))
}

fn get_encoding(buf: &mut &[u8]) -> Result<EncodingType, ProtocolError> {
    let value = get_str(buf, "encoding")?;
    value
        .parse()
        .map_err(|_| ProtocolError::UnknownEncoding(value))
}

fn get_compression(buf: &mut &[u8]) -> Result<CompressionType, ProtocolError> {
    let value = get_str(buf, "compression")?;
    value
        .parse()
        .map_err(|_| ProtocolError::UnknownCompression(value))
}
