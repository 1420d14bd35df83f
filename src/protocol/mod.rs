//! Wire protocol shared by clients, the coordinator and data nodes
//!
//! - `message`: typed requests/responses and the records they carry
//! - `frame`: length-prefixed framing and raw byte transfer over TCP

pub mod frame;
pub mod message;

pub use frame::Connection;
pub use message::{BlockId, ChunkEntry, Command, FileRecord, Manifest, NodeId, Request, Response};
