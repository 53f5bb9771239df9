//! Checksum calculation for request body deduplication.

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of a request body.
///
/// # Arguments
/// * `content` - canonical JSON string of the request body
///
/// # Returns
/// Hexadecimal string representation of the SHA-256 hash.
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Checksum of a serializable body. Serialization failures fall back to the
/// debug rendering so hashing itself never errors.
pub fn body_hash<T: serde::Serialize + std::fmt::Debug>(body: &T) -> String {
    match serde_json::to_string(body) {
        Ok(json) => calculate_checksum(&json),
        Err(_) => calculate_checksum(&format!("{:?}", body)),
    }
}
