//! secp256k1 keys, EIP-155 signatures, and address derivation.

use crate::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// A secp256k1 signature in its EIP-155 wire form.
///
/// `v = chain_id * 2 + 35 + parity`; legacy `v` values of 27/28 are not
/// accepted anywhere in this workspace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxSignature {
    /// Recovery parity folded with the chain id.
    pub v: u64,
    /// The R scalar.
    pub r: U256,
    /// The S scalar, always in the lower half of the curve order.
    pub s: U256,
}

/// Errors raised by signing and signer recovery.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// `s` is in the upper half of the curve order.
    #[error("signature s value is not canonical")]
    NonCanonicalSignature,
    /// `v` does not decode to recovery parity 0 or 1 for this chain.
    #[error("invalid recovery id in v = {0}")]
    InvalidRecoveryId(u64),
    /// The signature does not recover to a valid public key.
    #[error("signature recovery failed")]
    RecoveryFailed,
}

impl TxSignature {
    /// Recovery parity extracted from `v` for the given chain.
    pub fn parity(&self, chain_id: u64) -> Result<u8, CryptoError> {
        let base = chain_id * 2 + 35;
        match self.v.checked_sub(base) {
            Some(parity @ (0 | 1)) => Ok(parity as u8),
            _ => Err(CryptoError::InvalidRecoveryId(self.v)),
        }
    }
}

/// Derive the address of a public key: the last 20 bytes of the Keccak-256
/// digest of the uncompressed point without its `0x04` prefix byte.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

/// Generate a fresh keypair and the address it controls.
pub fn generate_keypair() -> (SigningKey, Address) {
    let key = SigningKey::random(&mut OsRng);
    let addr = address_of(key.verifying_key());
    (key, addr)
}

/// Sign a 32-byte message hash, producing a low-s signature with EIP-155 `v`.
pub fn sign_hash(hash: B256, key: &SigningKey, chain_id: u64) -> Result<TxSignature, CryptoError> {
    let (sig, recid) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|_| CryptoError::RecoveryFailed)?;
    // k256 emits low-s signatures, but normalize defensively and flip the
    // parity when it applies.
    let (sig, recid) = match sig.normalize_s() {
        Some(normalized) => {
            let flipped = RecoveryId::from_byte(recid.to_byte() ^ 1)
                .ok_or(CryptoError::RecoveryFailed)?;
            (normalized, flipped)
        }
        None => (sig, recid),
    };
    if recid.to_byte() > 1 {
        return Err(CryptoError::RecoveryFailed);
    }
    let bytes = sig.to_bytes();
    Ok(TxSignature {
        v: chain_id * 2 + 35 + recid.to_byte() as u64,
        r: U256::from_be_slice(&bytes[..32]),
        s: U256::from_be_slice(&bytes[32..]),
    })
}

/// Recover the signer address of a 32-byte message hash.
pub fn recover_signer(
    hash: B256,
    sig: &TxSignature,
    chain_id: u64,
) -> Result<Address, CryptoError> {
    let parity = sig.parity(chain_id)?;
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&sig.r.to_be_bytes::<32>());
    bytes[32..].copy_from_slice(&sig.s.to_be_bytes::<32>());
    let signature = Signature::from_slice(&bytes).map_err(|_| CryptoError::RecoveryFailed)?;
    if signature.normalize_s().is_some() {
        return Err(CryptoError::NonCanonicalSignature);
    }
    let recid = RecoveryId::from_byte(parity).ok_or(CryptoError::RecoveryFailed)?;
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Check that a signature over `hash` recovers to `expected`.
pub fn verify(hash: B256, sig: &TxSignature, chain_id: u64, expected: Address) -> bool {
    recover_signer(hash, sig, chain_id).map(|addr| addr == expected) == Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex;

    const CHAIN_ID: u64 = 1337;

    // secp256k1 group order
    fn order() -> U256 {
        U256::from_be_bytes(hex!(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141"
        ))
    }

    #[test]
    fn sign_recover_roundtrip() {
        let (key, addr) = generate_keypair();
        let hash = keccak256(b"roundtrip");
        let sig = sign_hash(hash, &key, CHAIN_ID).unwrap();
        assert!(sig.v == CHAIN_ID * 2 + 35 || sig.v == CHAIN_ID * 2 + 36);
        assert_eq!(recover_signer(hash, &sig, CHAIN_ID).unwrap(), addr);
        assert!(verify(hash, &sig, CHAIN_ID, addr));
    }

    #[test]
    fn recover_rejects_high_s() {
        let (key, _) = generate_keypair();
        let hash = keccak256(b"high-s");
        let mut sig = sign_hash(hash, &key, CHAIN_ID).unwrap();
        sig.s = order() - sig.s;
        assert_eq!(
            recover_signer(hash, &sig, CHAIN_ID),
            Err(CryptoError::NonCanonicalSignature)
        );
    }

    #[test]
    fn recover_rejects_legacy_v() {
        let (key, _) = generate_keypair();
        let hash = keccak256(b"legacy");
        let mut sig = sign_hash(hash, &key, CHAIN_ID).unwrap();
        sig.v = 27;
        assert_eq!(
            recover_signer(hash, &sig, CHAIN_ID),
            Err(CryptoError::InvalidRecoveryId(27))
        );
    }

    #[test]
    fn tampered_r_changes_signer() {
        let (key, addr) = generate_keypair();
        let hash = keccak256(b"tamper");
        let mut sig = sign_hash(hash, &key, CHAIN_ID).unwrap();
        sig.r ^= U256::from(1u64);
        assert_ne!(recover_signer(hash, &sig, CHAIN_ID).ok(), Some(addr));
    }

    #[test]
    fn chain_id_is_bound_into_v() {
        let (key, _) = generate_keypair();
        let hash = keccak256(b"replay");
        let sig = sign_hash(hash, &key, CHAIN_ID).unwrap();
        // A verifier on another chain cannot even decode the parity.
        assert_eq!(
            recover_signer(hash, &sig, CHAIN_ID + 1),
            Err(CryptoError::InvalidRecoveryId(sig.v))
        );
    }
}
