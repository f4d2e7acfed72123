//! Canonical recursive RLP items.
//!
//! Structured types in this workspace implement [`alloy_rlp`] traits
//! directly; [`RlpItem`] is the generic sum type for callers that need to
//! inspect or build arbitrary payloads. Decoding is strict: non-canonical
//! encodings and trailing bytes are rejected.

use crate::Bytes;
use alloy_rlp::{length_of_length, Encodable, Header, PayloadView};

/// A decoded RLP item: a byte string or a list of items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RlpItem {
    /// A byte string; the empty string doubles as integer zero.
    Bytes(Bytes),
    /// A nested list of items.
    List(Vec<RlpItem>),
}

/// Errors from strict RLP decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RlpError {
    /// The payload is malformed or not canonically encoded.
    #[error("malformed rlp: {0}")]
    Malformed(#[from] alloy_rlp::Error),
    /// Bytes remain after the outermost item.
    #[error("malformed rlp: {0} trailing bytes")]
    TrailingBytes(usize),
}

impl RlpItem {
    /// Byte-string item.
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// List item.
    pub fn list(items: impl Into<Vec<RlpItem>>) -> Self {
        Self::List(items.into())
    }

    /// Byte-string item holding a big-endian minimal unsigned integer.
    pub fn uint(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(8);
        Self::Bytes(Bytes::copy_from_slice(&bytes[start..]))
    }

    /// Encode into a fresh buffer.
    pub fn to_rlp(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        self.encode(&mut out);
        out
    }

    /// Decode a buffer that must contain exactly one item.
    pub fn decode_exact(mut buf: &[u8]) -> Result<Self, RlpError> {
        let item = Self::decode_item(&mut buf)?;
        if !buf.is_empty() {
            return Err(RlpError::TrailingBytes(buf.len()));
        }
        Ok(item)
    }

    fn decode_item(buf: &mut &[u8]) -> Result<Self, RlpError> {
        match Header::decode_raw(buf)? {
            PayloadView::String(payload) => Ok(Self::Bytes(Bytes::copy_from_slice(payload))),
            PayloadView::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for mut item in items {
                    out.push(Self::decode_item(&mut item)?);
                    if !item.is_empty() {
                        return Err(RlpError::TrailingBytes(item.len()));
                    }
                }
                Ok(Self::List(out))
            }
        }
    }

    fn payload_length(&self) -> usize {
        match self {
            Self::Bytes(_) => unreachable!("strings have no list payload"),
            Self::List(items) => items.iter().map(Encodable::length).sum(),
        }
    }
}

impl Encodable for RlpItem {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            Self::Bytes(bytes) => bytes.encode(out),
            Self::List(items) => {
                Header {
                    list: true,
                    payload_length: self.payload_length(),
                }
                .encode(out);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.length(),
            Self::List(_) => {
                let payload_length = self.payload_length();
                payload_length + length_of_length(payload_length)
            }
        }
    }
}
