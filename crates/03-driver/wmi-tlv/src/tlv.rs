//! TLV framing: a 32-bit little-endian header (`tag << 16 | len`) followed by
//! `len` value bytes padded to a 4-byte boundary.

use thiserror::Error;

pub const TLV_HDR_LEN: usize = 4;

const TLV_ALIGN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlvHeader {
    pub tag: u16,
    pub len: u16,
}

impl TlvHeader {
    pub fn word(self) -> u32 {
        (u32::from(self.tag) << 16) | u32::from(self.len)
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            tag: (word >> 16) as u16,
            len: (word & 0xFFFF) as u16,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("truncated tlv header at offset {offset}")]
    TruncatedHeader { offset: usize },
    #[error("tlv tag {tag:#x} at offset {offset} needs {len} bytes, {remaining} left")]
    TruncatedValue {
        offset: usize,
        tag: u16,
        len: usize,
        remaining: usize,
    },
    #[error("value of {len} bytes does not fit a tlv")]
    TooLong { len: usize },
}

/// One TLV borrowed from a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlvRef<'a> {
    pub tag: u16,
    pub value: &'a [u8],
}

/// Iterator over the TLVs of a payload.
pub struct TlvIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

pub fn walk(bytes: &[u8]) -> TlvIter<'_> {
    TlvIter {
        bytes,
        offset: 0,
        failed: false,
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<TlvRef<'a>, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        let offset = self.offset;
        let rest = &self.bytes[offset..];
        let Some(word) = rest.get(..TLV_HDR_LEN) else {
            self.failed = true;
            return Some(Err(TlvError::TruncatedHeader { offset }));
        };
        let mut raw = [0u8; TLV_HDR_LEN];
        raw.copy_from_slice(word);
        let header = TlvHeader::from_word(u32::from_le_bytes(raw));
        let len = usize::from(header.len);
        let body = &rest[TLV_HDR_LEN..];
        if len > body.len() {
            self.failed = true;
            return Some(Err(TlvError::TruncatedValue {
                offset,
                tag: header.tag,
                len,
                remaining: body.len(),
            }));
        }
        let padded = align_up(len).min(body.len());
        self.offset = offset + TLV_HDR_LEN + padded;
        Some(Ok(TlvRef {
            tag: header.tag,
            value: &body[..len],
        }))
    }
}

/// Builds a TLV payload.
#[derive(Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: u16, value: &[u8]) -> Result<&mut Self, TlvError> {
        let len = u16::try_from(value.len()).map_err(|_| TlvError::TooLong { len: value.len() })?;
        self.buf
            .extend_from_slice(&TlvHeader { tag, len }.word().to_le_bytes());
        self.buf.extend_from_slice(value);
        self.buf.resize(align_up(self.buf.len()), 0);
        Ok(self)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

const fn align_up(n: usize) -> usize {
    (n + TLV_ALIGN - 1) & !(TLV_ALIGN - 1)
}
