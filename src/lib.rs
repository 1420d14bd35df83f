//! # minidfs
//!
//! A minimal distributed file store with:
//! - A coordinator that keeps the node registry, file registry and chunk layouts
//! - Data nodes that each store one chunk per file
//! - A client that splits files into equal chunks and streams them directly
//!   to (and from) the data nodes
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │         Coordinator          │
//!                 │  nodes · files · manifests   │
//!                 │            (sled)            │
//!                 └──────▲───────────────▲───────┘
//!            REG (once)  │               │  LIST / PUT / GET / COMMIT
//!   ┌────────────────────┼──────┐        │
//!   │                    │      │     ┌──┴─────┐
//! ┌─┴──────────┐   ┌─────┴────┐ │     │ Client │
//! │ Data node 1│   │Data node 2│ ...  └──┬─────┘
//! │  chunk 0   │   │  chunk 1  │         │
//! └─────▲──────┘   └─────▲─────┘         │
//!       └────────────────┴───────────────┘
//!              chunk PUT / GET (direct)
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minidfs-meta serve --bind 0.0.0.0:8000 --db ./meta-data
//! ```
//!
//! ### Start data nodes
//! ```bash
//! minidfs-node serve --bind 127.0.0.1:9001 --data ./node1 --coordinator 127.0.0.1:8000
//! minidfs-node serve --bind 127.0.0.1:9002 --data ./node2 --coordinator 127.0.0.1:8000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minidfs put ./pajaro.jpg
//! minidfs ls
//! minidfs get pajaro.jpg ./copy.jpg
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod datanode;
pub mod protocol;

// Re-export commonly used types
pub use client::DfsClient;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use datanode::DataNode;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
