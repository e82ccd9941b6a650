use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the document text. Equal input always yields an
/// equal digest, which is what the skip-if-unchanged comparison relies on.
pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
