//! Hashing Utilities

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content and return as hex string
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a feature string into a bucket in `0..buckets` plus a sign.
///
/// The first eight digest bytes pick the bucket; the lowest bit of the
/// ninth byte picks the sign.
pub fn feature_hash(feature: &str, buckets: usize) -> (usize, f32) {
    let digest = Sha256::digest(feature.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let bucket = (u64::from_le_bytes(head) % buckets.max(1) as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
}
