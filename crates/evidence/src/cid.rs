//! CIDv0 derivation for backends that address blobs themselves.

use sha2::{Digest, Sha256};

/// Multihash code for sha2-256.
const SHA2_256: u8 = 0x12;

/// `base58btc(0x12 0x20 || sha256(bytes))`, the `Qm...` form.
pub fn cid_v0(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut multihash = Vec::with_capacity(2 + digest.len());
    multihash.push(SHA2_256);
    multihash.push(digest.len() as u8);
    multihash.extend_from_slice(&digest);
    bs58::encode(multihash).into_string()
}
