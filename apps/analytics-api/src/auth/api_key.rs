//! Tracking API keys: `nx_` followed by 64 lowercase hex characters.
//!
//! Only the SHA-256 hex digest of a key is ever stored.

use rand::Rng;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "nx_";
const API_KEY_HEX_LEN: usize = 64;

/// Generate a fresh raw API key.
pub fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    format!("{API_KEY_PREFIX}{}", to_hex(&bytes))
}

pub fn hash_api_key(raw: &str) -> String {
    to_hex(&Sha256::digest(raw.as_bytes()))
}

pub fn is_valid_api_key_format(raw: &str) -> bool {
    raw.strip_prefix(API_KEY_PREFIX).is_some_and(|hex| {
        hex.len() == API_KEY_HEX_LEN
            && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
