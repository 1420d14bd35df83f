//! Directory store using sled
//!
//! Stores:
//! - Node registry (`address:port` → NodeId)
//! - File registry (name → FileRecord)
//! - Per-file manifests (name → ordered chunk layout)
//!
//! Every check-then-insert sequence runs under one lock, and a file record is
//! always written together with its manifest in a single transaction.

use crate::common::{Error, Result};
use crate::protocol::{ChunkEntry, FileRecord, Manifest, NodeId};
use sled::transaction::TransactionError;
use sled::{Transactional, Tree};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const TREE_NODES: &str = "nodes";
const TREE_FILES: &str = "files";
const TREE_MANIFESTS: &str = "manifests";

pub struct DirectoryStore {
    db: sled::Db,
    nodes: Tree,
    files: Tree,
    manifests: Tree,
    write_lock: Mutex<()>,
}

impl DirectoryStore {
    /// Open or create the directory store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let nodes = db.open_tree(TREE_NODES)?;
        let files = db.open_tree(TREE_FILES)?;
        let manifests = db.open_tree(TREE_MANIFESTS)?;

        Ok(Self {
            db,
            nodes,
            files,
            manifests,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Internal("directory write lock poisoned".into()))
    }

    // === Node operations ===

    /// All registered nodes, in a stable order
    pub fn list_nodes(&self) -> Result<Vec<NodeId>> {
        let mut nodes = Vec::new();
        for item in self.nodes.iter() {
            let (_, value) = item?;
            nodes.push(bincode::deserialize(&value)?);
        }
        Ok(nodes)
    }

    /// Register a node. Returns `false` if it was already registered.
    pub fn add_node(&self, address: &str, port: u16) -> Result<bool> {
        let node = NodeId::new(address, port);
        let key = node.to_string();

        let _guard = self.lock()?;
        if self.nodes.contains_key(key.as_bytes())? {
            return Ok(false);
        }
        self.nodes.insert(key.as_bytes(), bincode::serialize(&node)?)?;
        Ok(true)
    }

    // === File operations ===

    /// All known files, sorted by name
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut files = Vec::new();
        for item in self.files.iter() {
            let (_, value) = item?;
            files.push(bincode::deserialize(&value)?);
        }
        Ok(files)
    }

    pub fn file(&self, name: &str) -> Result<Option<FileRecord>> {
        match self.files.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn file_size(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.file(name)?.map(|record| record.size))
    }

    /// Insert a file together with its manifest. Returns `false` if the name
    /// is already taken; nothing is written in that case.
    pub fn insert_file(&self, record: &FileRecord, manifest: &Manifest) -> Result<bool> {
        if record.name != manifest.name || record.size != manifest.size {
            return Err(Error::Internal(format!(
                "manifest for {} does not match its file record",
                record.name
            )));
        }

        let key = record.name.as_bytes();
        let record_bytes = bincode::serialize(record)?;
        let manifest_bytes = bincode::serialize(manifest)?;

        let _guard = self.lock()?;
        if self.files.contains_key(key)? {
            return Ok(false);
        }

        let result: std::result::Result<(), TransactionError<()>> = (&self.files, &self.manifests)
            .transaction(|(files, manifests)| {
                files.insert(key, record_bytes.as_slice())?;
                manifests.insert(key, manifest_bytes.as_slice())?;
                Ok(())
            });
        result.map_err(|e| match e {
            TransactionError::Storage(e) => Error::Directory(e),
            TransactionError::Abort(()) => Error::Internal("file insert aborted".into()),
        })?;

        Ok(true)
    }

    // === Manifest operations ===

    pub fn manifest(&self, name: &str) -> Result<Option<Manifest>> {
        match self.manifests.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record the block IDs and checksums of a finished upload.
    ///
    /// The reported chunks must match the stored layout exactly (same count,
    /// and the same index, node and size for each entry). A manifest is
    /// committed once; later commits are rejected.
    pub fn record_blocks(&self, name: &str, chunks: &[ChunkEntry]) -> Result<Manifest> {
        let _guard = self.lock()?;

        let mut manifest = self
            .manifest(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if manifest.is_committed() {
            return Err(Error::Rejected(format!("{} is already committed", name)));
        }
        if chunks.len() != manifest.chunks.len() {
            return Err(Error::Rejected(format!(
                "{} has {} chunks, commit reported {}",
                name,
                manifest.chunks.len(),
                chunks.len()
            )));
        }

        for (planned, reported) in manifest.chunks.iter_mut().zip(chunks) {
            if planned.index != reported.index
                || planned.node != reported.node
                || planned.size != reported.size
            {
                return Err(Error::Rejected(format!(
                    "chunk {} of {} does not match the stored layout",
                    reported.index, name
                )));
            }
            let block_id = reported.block_id.clone().ok_or_else(|| {
                Error::Rejected(format!("chunk {} of {} has no block id", reported.index, name))
            })?;
            planned.block_id = Some(block_id);
            planned.checksum = reported.checksum.clone();
        }

        self.manifests
            .insert(name.as_bytes(), bincode::serialize(&manifest)?)?;
        Ok(manifest)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BlockId;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn record(name: &str, size: u64) -> FileRecord {
        FileRecord {
            name: name.to_string(),
            size,
            created_at: 1234567890,
        }
    }

    #[test]
    fn test_node_registry() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("dfs.db")).unwrap();

        assert!(store.add_node("localhost", 1111).unwrap());
        assert!(!store.add_node("localhost", 1111).unwrap());
        assert!(store.add_node("localhost", 2222).unwrap());

        let nodes = store.list_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes, store.list_nodes().unwrap());
    }

    #[test]
    fn test_concurrent_registration() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DirectoryStore::open(dir.path().join("dfs.db")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.add_node("10.0.0.7", 9000).unwrap())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(store.list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_file_registry() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("dfs.db")).unwrap();
        let nodes = vec![NodeId::new("localhost", 1111)];

        let manifest = Manifest::plan("report.txt", 500, &nodes).unwrap();
        assert!(store.insert_file(&record("report.txt", 500), &manifest).unwrap());

        let manifest = Manifest::plan("report.txt", 900, &nodes).unwrap();
        assert!(!store.insert_file(&record("report.txt", 900), &manifest).unwrap());

        assert_eq!(store.file_size("report.txt").unwrap(), Some(500));
        assert_eq!(store.file_size("missing.txt").unwrap(), None);
        assert_eq!(store.list_files().unwrap().len(), 1);
        assert_eq!(store.manifest("report.txt").unwrap().unwrap().size, 500);
    }

    #[test]
    fn test_record_blocks() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("dfs.db")).unwrap();
        let nodes = vec![NodeId::new("a", 1), NodeId::new("b", 2)];

        let manifest = Manifest::plan("pajaro.jpg", 11, &nodes).unwrap();
        store
            .insert_file(&record("pajaro.jpg", 11), &manifest)
            .unwrap();

        let mut reported = manifest.chunks.clone();
        for chunk in reported.iter_mut() {
            chunk.block_id = Some(BlockId::generate(&chunk.node));
            chunk.checksum = Some("abc".to_string());
        }

        // Wrong size for a chunk
        let mut bad = reported.clone();
        bad[1].size += 1;
        assert!(matches!(
            store.record_blocks("pajaro.jpg", &bad),
            Err(Error::Rejected(_))
        ));
        assert!(!store.manifest("pajaro.jpg").unwrap().unwrap().is_committed());

        let committed = store.record_blocks("pajaro.jpg", &reported).unwrap();
        assert!(committed.is_committed());
        assert_eq!(store.manifest("pajaro.jpg").unwrap().unwrap(), committed);

        assert!(matches!(
            store.record_blocks("missing.jpg", &reported),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_commit_is_final() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("dfs.db")).unwrap();
        let nodes = vec![NodeId::new("a", 1), NodeId::new("b", 2)];

        let manifest = Manifest::plan("report.txt", 500, &nodes).unwrap();
        store
            .insert_file(&record("report.txt", 500), &manifest)
            .unwrap();

        let mut first = manifest.chunks.clone();
        for chunk in first.iter_mut() {
            chunk.block_id = Some(BlockId::generate(&chunk.node));
            chunk.checksum = Some("abc".to_string());
        }
        let committed = store.record_blocks("report.txt", &first).unwrap();

        // Same layout, different blocks: must not redirect later reads
        let mut second = manifest.chunks.clone();
        for chunk in second.iter_mut() {
            chunk.block_id = Some(BlockId::generate(&chunk.node));
            chunk.checksum = Some("def".to_string());
        }
        assert!(matches!(
            store.record_blocks("report.txt", &second),
            Err(Error::Rejected(_))
        ));
        assert_eq!(store.manifest("report.txt").unwrap().unwrap(), committed);
    }
}
