//! Client library used by the `minidfs` binary

pub mod chunk;
pub mod dfs;

pub use chunk::{chunk_sizes, split_chunks};
pub use dfs::{DfsClient, GetReport, PutReport};
