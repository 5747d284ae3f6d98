//! Tiplock Crypto
//!
//! The ledger signing identity: secp256k1 keys, keccak-256, EVM addresses
//! and recoverable signatures over transaction hashes. Nothing here knows
//! about reports or transactions.

pub mod hash;
pub mod keys;
pub mod sign;

pub use hash::{keccak256, sha256};
pub use keys::{Address, KeyError, LedgerKeypair};
pub use sign::{recover_address, sign_prehash, RecoverableSignature, SignError};
