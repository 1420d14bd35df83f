//! Hashing utilities for minidfs
//!
//! BLAKE3 checksums are recorded per chunk so retrieval can detect a block
//! that was truncated or rewritten on a data node.

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{}", hash)
}

/// Check `data` against a recorded checksum
pub fn verify_checksum(data: &[u8], expected: &str) -> crate::Result<()> {
    let actual = blake3_hash(data);
    if actual != expected {
        return Err(crate::Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
