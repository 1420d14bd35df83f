//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{ClientConfig, Config, CoordinatorConfig, DataNodeConfig};
pub use error::{Error, Result};
pub use hash::{blake3_hash, verify_checksum};
pub use utils::{clean_path, format_bytes, retry_with_backoff, timestamp_now, validate_file_name};
