use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

use crate::keys::{Address, LedgerKeypair};

#[derive(Debug, Error)]
pub enum SignError {
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
}

/// Low-s ECDSA signature plus the recovery bit the ledger needs to derive
/// the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

/// Sign a 32-byte digest (RFC 6979 nonce, s normalized to the low half).
pub fn sign_prehash(
    keypair: &LedgerKeypair,
    prehash: &[u8; 32],
) -> Result<RecoverableSignature, SignError> {
    let (sig, recid) = keypair
        .signing_key()
        .sign_prehash_recoverable(prehash)
        .map_err(|e| SignError::Signing(e.to_string()))?;

    let (sig, recid) = match sig.normalize_s() {
        Some(low) => (low, RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced())),
        None => (sig, recid),
    };

    let bytes = sig.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(RecoverableSignature {
        r,
        s,
        recovery_id: recid.to_byte(),
    })
}

/// Recover the signer's address from a digest and signature.
pub fn recover_address(
    prehash: &[u8; 32],
    signature: &RecoverableSignature,
) -> Result<Address, SignError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig =
        Signature::from_slice(&bytes).map_err(|e| SignError::InvalidSignature(e.to_string()))?;
    let recid = RecoveryId::from_byte(signature.recovery_id)
        .ok_or(SignError::InvalidRecoveryId(signature.recovery_id))?;
    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recid)
        .map_err(|e| SignError::InvalidSignature(e.to_string()))?;
    Ok(Address::from_verifying_key(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    #[test]
    fn test_sign_and_recover() {
        let keypair = LedgerKeypair::generate();
        let digest = keccak256(b"theft at 5th ave");

        let sig = sign_prehash(&keypair, &digest).unwrap();
        assert!(sig.recovery_id <= 1);
        assert_eq!(recover_address(&digest, &sig).unwrap(), keypair.address());
    }

    #[test]
    fn test_wrong_digest_recovers_other_address() {
        let keypair = LedgerKeypair::generate();
        let sig = sign_prehash(&keypair, &keccak256(b"a")).unwrap();
        let recovered = recover_address(&keccak256(b"b"), &sig);
        assert!(recovered.map(|a| a != keypair.address()).unwrap_or(true));
    }

    #[test]
    fn test_signature_is_deterministic_and_low_s() {
        let keypair = LedgerKeypair::generate();
        let digest = keccak256(b"same input");
        let a = sign_prehash(&keypair, &digest).unwrap();
        let b = sign_prehash(&keypair, &digest).unwrap();
        assert_eq!(a, b);
        // Upper bound of the low half of the curve order starts with 0x7f.
        assert!(a.s[0] <= 0x7f);
    }
}
