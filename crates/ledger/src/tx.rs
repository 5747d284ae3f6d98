//! Legacy (type 0) transactions with EIP-155 replay protection.

use tiplock_crypto::{keccak256, sign_prehash, Address, LedgerKeypair, RecoverableSignature};

use crate::rlp::{encode_bytes, encode_list, encode_uint};
use crate::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// The transaction hash; doubles as the submission id.
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

/// Big-endian scalar with leading zeros removed, as RLP wants integers.
fn encode_scalar(bytes: &[u8; 32]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    encode_bytes(&bytes[first..])
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            encode_uint(self.nonce as u128),
            encode_uint(self.gas_price),
            encode_uint(self.gas_limit as u128),
            encode_bytes(self.to.as_bytes()),
            encode_uint(self.value),
            encode_bytes(&self.data),
        ]
    }

    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(encode_uint(self.chain_id as u128));
        fields.push(encode_uint(0));
        fields.push(encode_uint(0));
        encode_list(&fields)
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// EIP-155 `v` for a recovery id.
    pub fn v(&self, recovery_id: u8) -> u128 {
        recovery_id as u128 + 35 + 2 * self.chain_id as u128
    }

    pub fn sign(&self, keypair: &LedgerKeypair) -> Result<SignedTransaction, LedgerError> {
        let signature = sign_prehash(keypair, &self.signing_hash())
            .map_err(|e| LedgerError::Signing(e.to_string()))?;
        Ok(self.assemble(&signature))
    }

    fn assemble(&self, signature: &RecoverableSignature) -> SignedTransaction {
        let mut fields = self.base_fields();
        fields.push(encode_uint(self.v(signature.recovery_id)));
        fields.push(encode_scalar(&signature.r));
        fields.push(encode_scalar(&signature.s));
        let raw = encode_list(&fields);
        let hash = keccak256(&raw);
        SignedTransaction { raw, hash }
    }
}
