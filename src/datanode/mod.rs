//! Data node: stores one chunk per file and serves it back to clients

pub mod block;
pub mod server;

pub use block::{BlockMeta, BlockStore};
pub use server::{DataNode, Registration};
