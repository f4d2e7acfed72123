use crate::{B256, EMPTY_ROOT_HASH, KECCAK_EMPTY, U256};
use alloy_rlp::{length_of_length, Decodable, Encodable, Header};

/// Account record stored in the state trie.
///
/// Encoded as the RLP list `[nonce, balance, storage_root, code_hash]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    /// Count of transactions sent from this account, strictly monotonic.
    pub nonce: u64,
    /// Balance in the smallest denomination.
    pub balance: U256,
    /// Root of the contract storage trie.
    pub storage_root: B256,
    /// Keccak-256 of the installed code.
    pub code_hash: B256,
}

impl Account {
    /// Account with zero balance, no storage, and no code.
    pub const fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
        }
    }

    /// True when contract code is installed.
    #[inline]
    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }

    fn payload_length(&self) -> usize {
        self.nonce.length()
            + self.balance.length()
            + self.storage_root.length()
            + self.code_hash.length()
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::empty()
    }
}

impl Encodable for Account {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.nonce.encode(out);
        self.balance.encode(out);
        self.storage_root.encode(out);
        self.code_hash.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for Account {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let this = Self {
            nonce: u64::decode(buf)?,
            balance: U256::decode(buf)?,
            storage_root: B256::decode(buf)?,
            code_hash: B256::decode(buf)?,
        };
        let consumed = started_len - buf.len();
        if consumed != header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: header.payload_length,
                got: consumed,
            });
        }
        Ok(this)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rlp_roundtrip() {
        let account = Account {
            nonce: 7,
            balance: U256::from(123_456_789u64),
            storage_root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
        };
        let encoded = alloy_rlp::encode(account);
        assert_eq!(encoded.len(), account.length());
        assert_eq!(Account::decode(&mut encoded.as_slice()).unwrap(), account);
    }

    #[test]
    fn empty_account_uses_well_known_hashes() {
        let account = Account::empty();
        assert!(!account.has_code());
        assert_eq!(account.storage_root, EMPTY_ROOT_HASH);
        assert_eq!(account.code_hash, KECCAK_EMPTY);
    }
}
