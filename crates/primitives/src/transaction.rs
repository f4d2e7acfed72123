use crate::{
    crypto::{self, CryptoError, TxSignature},
    keccak256, Address, Bytes, B256, U256,
};
use alloy_rlp::{length_of_length, Decodable, Encodable, Header, EMPTY_STRING_CODE};

/// A signed account-based transaction.
///
/// The canonical encoding is the RLP list
/// `[nonce, gas_price, gas_limit, to, value, data, v, r, s]`; its Keccak-256
/// digest identifies the transaction across the chain. The [`Encodable`]
/// impl is the storage form, which additionally carries `from` so bodies can
/// be reloaded without re-running signature recovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Sender, recovered from the signature and carried for convenience.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in the smallest denomination.
    pub value: U256,
    /// Sender nonce at submission.
    pub nonce: u64,
    /// Price per unit of gas, in the smallest denomination.
    pub gas_price: U256,
    /// Upper bound of gas spent by this transaction.
    pub gas_limit: u64,
    /// Call data or contract init code.
    pub data: Bytes,
    /// EIP-155 signature.
    pub signature: TxSignature,
}

impl Transaction {
    /// Keccak-256 of the canonical signed encoding.
    pub fn hash(&self) -> B256 {
        keccak256(self.rlp_signed())
    }

    /// Keccak-256 of the EIP-155 unsigned encoding
    /// `[nonce, gas_price, gas_limit, to, value, data, chain_id, 0, 0]`.
    pub fn signing_hash(&self, chain_id: u64) -> B256 {
        keccak256(self.rlp_unsigned(chain_id))
    }

    /// Recover the signer from the carried signature.
    pub fn recover(&self, chain_id: u64) -> Result<Address, CryptoError> {
        crypto::recover_signer(self.signing_hash(chain_id), &self.signature, chain_id)
    }

    /// Maximum fee this transaction can burn: `gas_price * gas_limit`.
    ///
    /// `None` on 256-bit overflow.
    pub fn fee(&self) -> Option<U256> {
        self.gas_price.checked_mul(U256::from(self.gas_limit))
    }

    /// Total debit the sender must cover: `value + fee`.
    pub fn cost(&self) -> Option<U256> {
        self.value.checked_add(self.fee()?)
    }

    /// True for contract-creation transactions.
    #[inline]
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Canonical signed encoding, the preimage of [`Self::hash`].
    pub fn rlp_signed(&self) -> Vec<u8> {
        let payload_length = self.signed_payload_length();
        let mut out = Vec::with_capacity(payload_length + length_of_length(payload_length));
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_common(&mut out);
        self.signature.v.encode(&mut out);
        self.signature.r.encode(&mut out);
        self.signature.s.encode(&mut out);
        out
    }

    /// EIP-155 unsigned encoding, the preimage of [`Self::signing_hash`].
    pub fn rlp_unsigned(&self, chain_id: u64) -> Vec<u8> {
        let payload_length = self.common_payload_length() + chain_id.length() + 2;
        let mut out = Vec::with_capacity(payload_length + length_of_length(payload_length));
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_common(&mut out);
        chain_id.encode(&mut out);
        0u64.encode(&mut out);
        0u64.encode(&mut out);
        out
    }

    fn encode_common(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        encode_opt_address(&self.to, out);
        self.value.encode(out);
        self.data.encode(out);
    }

    fn common_payload_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + opt_address_length(&self.to)
            + self.value.length()
            + self.data.length()
    }

    fn signed_payload_length(&self) -> usize {
        self.common_payload_length()
            + self.signature.v.length()
            + self.signature.r.length()
            + self.signature.s.length()
    }

    fn storage_payload_length(&self) -> usize {
        self.from.length() + self.signed_payload_length()
    }
}

/// Address a contract created by `sender` at `nonce` is deployed to:
/// the last 20 bytes of `keccak256(rlp([sender, nonce]))`.
pub fn contract_address(sender: Address, nonce: u64) -> Address {
    let payload_length = sender.length() + nonce.length();
    let mut out = Vec::with_capacity(payload_length + 1);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    sender.encode(&mut out);
    nonce.encode(&mut out);
    let digest = keccak256(out);
    Address::from_slice(&digest[12..])
}

fn encode_opt_address(addr: &Option<Address>, out: &mut dyn alloy_rlp::BufMut) {
    match addr {
        Some(addr) => addr.encode(out),
        None => out.put_u8(EMPTY_STRING_CODE),
    }
}

fn opt_address_length(addr: &Option<Address>) -> usize {
    match addr {
        Some(addr) => addr.length(),
        None => 1,
    }
}

pub(crate) fn decode_opt_address(buf: &mut &[u8]) -> alloy_rlp::Result<Option<Address>> {
    if buf.first() == Some(&EMPTY_STRING_CODE) {
        *buf = &buf[1..];
        Ok(None)
    } else {
        Ok(Some(Address::decode(buf)?))
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        Header {
            list: true,
            payload_length: self.storage_payload_length(),
        }
        .encode(out);
        self.from.encode(out);
        self.encode_common(out);
        self.signature.v.encode(out);
        self.signature.r.encode(out);
        self.signature.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.storage_payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for Transaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();
        let this = Self {
            from: Address::decode(buf)?,
            nonce: u64::decode(buf)?,
            gas_price: U256::decode(buf)?,
            gas_limit: u64::decode(buf)?,
            to: decode_opt_address(buf)?,
            value: U256::decode(buf)?,
            data: Bytes::decode(buf)?,
            signature: TxSignature {
                v: u64::decode(buf)?,
                r: U256::decode(buf)?,
                s: U256::decode(buf)?,
            },
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
    use crate::{constants::TX_GAS, crypto::generate_keypair, hex};
    use rstest::rstest;

    fn sample(to: Option<Address>) -> Transaction {
        Transaction {
            from: Address::with_last_byte(1),
            to,
            value: U256::from(5u64),
            nonce: 3,
            gas_price: U256::from(1_000_000_000u64),
            gas_limit: TX_GAS,
            data: Bytes::new(),
            signature: TxSignature::default(),
        }
    }

    #[test]
    fn storage_rlp_roundtrip() {
        for to in [Some(Address::with_last_byte(2)), None] {
            let tx = sample(to);
            let encoded = alloy_rlp::encode(&tx);
            assert_eq!(encoded.len(), tx.length());
            assert_eq!(Transaction::decode(&mut encoded.as_slice()).unwrap(), tx);
        }
    }

    #[test]
    fn hash_covers_signature() {
        let mut tx = sample(Some(Address::with_last_byte(2)));
        let before = tx.hash();
        tx.signature.r = U256::from(1u64);
        assert_ne!(tx.hash(), before);
    }

    #[test]
    fn signing_hash_ignores_signature() {
        let mut tx = sample(Some(Address::with_last_byte(2)));
        let before = tx.signing_hash(1337);
        tx.signature.r = U256::from(1u64);
        assert_eq!(tx.signing_hash(1337), before);
        assert_ne!(tx.signing_hash(1338), before);
    }

    #[test]
    fn sign_then_recover() {
        let (key, addr) = generate_keypair();
        let mut tx = sample(Some(Address::with_last_byte(2)));
        tx.from = addr;
        tx.signature = crypto::sign_hash(tx.signing_hash(1337), &key, 1337).unwrap();
        assert_eq!(tx.recover(1337).unwrap(), addr);
    }

    #[test]
    fn cost_overflow_is_none() {
        let mut tx = sample(None);
        tx.gas_price = U256::MAX;
        assert_eq!(tx.fee(), None);
        assert_eq!(tx.cost(), None);
    }

    #[rstest]
    #[case(0, hex!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"))]
    #[case(1, hex!("343c43a37d37dff08ae8c4a11544c718abb4fcf8"))]
    fn contract_address_vectors(#[case] nonce: u64, #[case] expected: [u8; 20]) {
        let sender = Address::from_slice(&hex!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0"));
        assert_eq!(contract_address(sender, nonce), Address::from_slice(&expected));
    }
}
