//! On-disk block storage for one data node
//!
//! Layout:
//! ```text
//! <root>/<file name>/<uuid>:<address><port>        raw chunk bytes
//! <root>/<file name>/<uuid>:<address><port>.meta   BlockMeta (JSON)
//! ```
//!
//! The `.meta` sidecar is written after the block itself, so a block whose
//! write was interrupted is never visible to lookups. Ownership is decided by
//! comparing `BlockMeta::owner` with this node's identity.

use crate::common::{blake3_hash, clean_path, timestamp_now, validate_file_name, Error, Result};
use crate::protocol::{BlockId, NodeId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const META_SUFFIX: &str = ".meta";

/// Metadata stored next to every block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub owner: NodeId,
    pub file_name: String,
    pub size: u64,
    pub checksum: String,
    pub created_at: u64,
}

pub struct BlockStore {
    root: PathBuf,
    node: NodeId,
}

impl BlockStore {
    /// Open (creating if needed) the storage root for `node`
    pub fn open(root: impl AsRef<Path>, node: NodeId) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, node })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn new_block_id(&self) -> BlockId {
        BlockId::generate(&self.node)
    }

    fn file_dir(&self, file_name: &str) -> Result<PathBuf> {
        let name = clean_path(file_name);
        validate_file_name(name)?;
        Ok(self.root.join(name))
    }

    fn block_paths(dir: &Path, block_id: &BlockId) -> Result<(PathBuf, PathBuf)> {
        validate_file_name(block_id.as_str())?;
        let block = dir.join(block_id.as_str());
        let meta = dir.join(format!("{}{}", block_id, META_SUFFIX));
        Ok((block, meta))
    }

    /// Persist a chunk of `file_name` under `block_id`
    pub fn write_block(&self, file_name: &str, block_id: &BlockId, data: &[u8]) -> Result<BlockMeta> {
        let dir = self.file_dir(file_name)?;
        fs::create_dir_all(&dir)?;
        let (block_path, meta_path) = Self::block_paths(&dir, block_id)?;

        let mut file = File::create(&block_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        let meta = BlockMeta {
            block_id: block_id.clone(),
            owner: self.node.clone(),
            file_name: clean_path(file_name).to_string(),
            size: data.len() as u64,
            checksum: blake3_hash(data),
            created_at: timestamp_now(),
        };

        let mut file = File::create(&meta_path)?;
        file.write_all(&serde_json::to_vec(&meta)?)?;
        file.sync_all()?;

        tracing::debug!("Stored block {} ({} bytes) at {:?}", block_id, meta.size, block_path);
        Ok(meta)
    }

    /// Metadata of a specific block, which must belong to this node
    pub fn block_meta(&self, file_name: &str, block_id: &BlockId) -> Result<BlockMeta> {
        let dir = self.file_dir(file_name)?;
        let (_, meta_path) = Self::block_paths(&dir, block_id)?;

        let bytes = match fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("block {} of {}", block_id, file_name)));
            }
            Err(e) => return Err(e.into()),
        };

        let meta: BlockMeta = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Corrupted(format!("{:?}: {}", meta_path, e)))?;
        if meta.owner != self.node {
            return Err(Error::NotFound(format!(
                "block {} of {} is owned by {}, not {}",
                block_id, file_name, meta.owner, self.node
            )));
        }
        Ok(meta)
    }

    /// The single block of `file_name` owned by this node
    pub fn find_block(&self, file_name: &str) -> Result<BlockMeta> {
        let dir = self.file_dir(file_name)?;

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(file_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut meta_files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if is_meta {
                meta_files.push(path);
            }
        }
        meta_files.sort();

        let mut owned = Vec::new();
        for path in meta_files {
            let meta: BlockMeta = serde_json::from_slice(&fs::read(&path)?)
                .map_err(|e| Error::Corrupted(format!("{:?}: {}", path, e)))?;
            if meta.owner == self.node {
                owned.push(meta);
            }
        }

        match owned.len() {
            0 => Err(Error::NotFound(format!("no block of {} on {}", file_name, self.node))),
            1 => Ok(owned.remove(0)),
            n => Err(Error::Corrupted(format!(
                "{} blocks of {} owned by {}",
                n, file_name, self.node
            ))),
        }
    }

    /// Locate (by exact id when known, by ownership otherwise) and read a block
    pub fn load(&self, file_name: &str, block_id: Option<&BlockId>) -> Result<(BlockMeta, Vec<u8>)> {
        let meta = match block_id {
            Some(id) => self.block_meta(file_name, id)?,
            None => self.find_block(file_name)?,
        };

        let dir = self.file_dir(file_name)?;
        let (block_path, _) = Self::block_paths(&dir, &meta.block_id)?;
        let data = fs::read(&block_path)?;

        if data.len() as u64 != meta.size {
            return Err(Error::Corrupted(format!(
                "block {} holds {} bytes, metadata says {}",
                meta.block_id,
                data.len(),
                meta.size
            )));
        }
        Ok((meta, data))
    }
}
