//! Parsing of boundary string inputs.
//!
//! The query surface speaks lowercase `0x`-prefixed hex; these helpers turn
//! those strings back into fixed-width types with distinguishable failures.

use crate::{hex, Address, B256};
use k256::ecdsa::SigningKey;

/// Errors for boundary string inputs.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// The input is not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// The input does not decode to 20 bytes.
    #[error("invalid address: decoded {0} bytes, expected 20")]
    InvalidAddress(usize),
    /// The input does not decode to 32 bytes.
    #[error("invalid hash: decoded {0} bytes, expected 32")]
    InvalidHash(usize),
    /// The input is not a valid secp256k1 private key.
    #[error("invalid private key")]
    InvalidPrivateKey,
}

/// Parse a 20-byte address from hex, with or without the `0x` prefix.
pub fn parse_address(input: &str) -> Result<Address, ParseError> {
    let bytes = hex::decode(input)?;
    if bytes.len() != Address::len_bytes() {
        return Err(ParseError::InvalidAddress(bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse a 32-byte hash from hex, with or without the `0x` prefix.
pub fn parse_hash(input: &str) -> Result<B256, ParseError> {
    let bytes = hex::decode(input)?;
    if bytes.len() != B256::len_bytes() {
        return Err(ParseError::InvalidHash(bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Parse a secp256k1 private key from 32 bytes of hex.
pub fn parse_private_key(input: &str) -> Result<SigningKey, ParseError> {
    let bytes = hex::decode(input)?;
    SigningKey::from_slice(&bytes).map_err(|_| ParseError::InvalidPrivateKey)
}
