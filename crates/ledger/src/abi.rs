//! Contract calldata: 4-byte selector plus ABI-encoded string arguments.

use tiplock_crypto::keccak256;

/// Solidity word size.
const WORD: usize = 32;

pub const ADD_REPORT: &str = "addReport(string)";
pub const ADD_REPORT_WITH_EVIDENCE: &str = "addReport(string,string)";

/// First four bytes of keccak-256 over the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word(value: usize) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    out[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    out
}

/// ABI-encode a tuple made only of `string` values.
///
/// The head holds one offset per argument; each tail entry is the byte
/// length followed by the bytes, right-padded to a whole word.
pub fn encode_strings(values: &[&str]) -> Vec<u8> {
    let head_len = values.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for value in values {
        head.extend_from_slice(&word(head_len + tail.len()));
        let bytes = value.as_bytes();
        tail.extend_from_slice(&word(bytes.len()));
        tail.extend_from_slice(bytes);
        let padding = (WORD - bytes.len() % WORD) % WORD;
        tail.resize(tail.len() + padding, 0);
    }

    head.extend_from_slice(&tail);
    head
}

/// Calldata for `addReport`, choosing the overload by whether there is
/// evidence.
pub fn encode_add_report(text: &str, evidence_url: Option<&str>) -> Vec<u8> {
    let (signature, args): (&str, Vec<&str>) = match evidence_url {
        Some(url) => (ADD_REPORT_WITH_EVIDENCE, vec![text, url]),
        None => (ADD_REPORT, vec![text]),
    };
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode_strings(&args));
    data
}
