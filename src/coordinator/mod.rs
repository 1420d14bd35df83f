//! Coordinator: the metadata service
//!
//! The coordinator is responsible for:
//! - The data node registry (who can hold chunks)
//! - The file registry (name → size)
//! - Chunk layouts, fixed when a file is first stored

pub mod directory;
pub mod server;

pub use directory::DirectoryStore;
pub use server::{CoordState, Coordinator};
