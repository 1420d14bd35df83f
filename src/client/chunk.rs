//! Partitioning a file into one chunk per data node
//!
//! `N` nodes get `floor(S / N)` bytes each; the last chunk also takes the
//! remainder. The coordinator derives a file's manifest with the same
//! function, so both sides agree on every chunk length.

use crate::common::{Error, Result};

/// Chunk lengths for a file of `total` bytes spread over `nodes` nodes
pub fn chunk_sizes(total: u64, nodes: usize) -> Result<Vec<u64>> {
    if nodes == 0 {
        return Err(Error::NoDataNodes);
    }

    let n = nodes as u64;
    let per_node = total / n;
    let remainder = total - per_node * n;

    let mut sizes = vec![per_node; nodes];
    if let Some(last) = sizes.last_mut() {
        *last += remainder;
    }
    Ok(sizes)
}

/// Split `data` into `nodes` contiguous slices with the lengths of [`chunk_sizes`]
pub fn split_chunks(data: &[u8], nodes: usize) -> Result<Vec<&[u8]>> {
    let sizes = chunk_sizes(data.len() as u64, nodes)?;

    let mut chunks = Vec::with_capacity(sizes.len());
    let mut start = 0usize;
    for size in sizes {
        let end = start + size as usize;
        chunks.push(&data[start..end]);
        start = end;
    }
    Ok(chunks)
}
