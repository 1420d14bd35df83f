//! Client side of the file store: scatter a file over data nodes on PUT,
//! gather it back in chunk order on GET
//!
//! The coordinator is only asked where chunks go (or went); chunk bytes
//! travel directly between the client and each data node, one node at a time.

use crate::client::chunk::split_chunks;
use crate::common::{
    blake3_hash, clean_path, verify_checksum, ClientConfig, Error, Result,
};
use crate::protocol::{ChunkEntry, Connection, FileRecord, NodeId, Request, Response};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Summary of a stored file
#[derive(Debug, Clone)]
pub struct PutReport {
    pub name: String,
    pub size: u64,
    pub chunks: Vec<ChunkEntry>,
}

/// Summary of a retrieved file
#[derive(Debug, Clone)]
pub struct GetReport {
    pub name: String,
    pub size: u64,
    pub chunks: usize,
    pub path: PathBuf,
}

pub struct DfsClient {
    config: ClientConfig,
}

impl DfsClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn coordinator(&self) -> &str {
        &self.config.coordinator_addr
    }

    async fn connect(&self, addr: &str) -> Result<Connection> {
        Connection::connect(addr, self.config.max_frame_len, self.config.io_timeout()).await
    }

    async fn call_coordinator(&self, request: &Request) -> Result<Response> {
        let mut conn = self.connect(&self.config.coordinator_addr).await?;
        let response = conn.call(request).await?;
        conn.finish().await;
        Ok(response)
    }

    /// Files known to the coordinator
    pub async fn list(&self) -> Result<Vec<FileRecord>> {
        match self.call_coordinator(&Request::list()).await? {
            Response::Files { files } => Ok(files),
            other => Err(other.into_error("list")),
        }
    }

    /// Store the local file `src` as `name` (defaults to the file's base name)
    pub async fn put_file(&self, src: impl AsRef<Path>, name: Option<&str>) -> Result<PutReport> {
        let src = src.as_ref();
        let name = match name {
            Some(name) => clean_path(name).to_string(),
            None => src
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput(format!("{:?} has no file name", src)))?,
        };

        let data = fs::read(src).await?;
        self.put_bytes(&name, &data).await
    }

    /// Store `data` as `name`
    pub async fn put_bytes(&self, name: &str, data: &[u8]) -> Result<PutReport> {
        let size = data.len() as u64;

        let nodes = match self.call_coordinator(&Request::put(name, size)).await? {
            Response::Nodes { nodes } => nodes,
            other => return Err(other.into_error(name)),
        };
        tracing::info!("Storing {} ({} bytes) across {} nodes", name, size, nodes.len());

        let chunks = split_chunks(data, nodes.len())?;
        let mut entries = Vec::with_capacity(chunks.len());
        for (index, (node, chunk)) in nodes.into_iter().zip(chunks).enumerate() {
            entries.push(self.send_chunk(name, index as u32, node, chunk).await?);
        }

        match self
            .call_coordinator(&Request::commit(name, entries.clone()))
            .await?
        {
            Response::Ack => {}
            other => return Err(other.into_error(name)),
        }

        Ok(PutReport {
            name: clean_path(name).to_string(),
            size,
            chunks: entries,
        })
    }

    async fn send_chunk(
        &self,
        name: &str,
        index: u32,
        node: NodeId,
        chunk: &[u8],
    ) -> Result<ChunkEntry> {
        let size = chunk.len() as u64;
        let mut conn = self.connect(&node.endpoint()).await?;

        let block_id = match conn.call(&Request::put(name, size)).await? {
            Response::Assigned { block_id } => block_id,
            other => return Err(other.into_error(&format!("chunk {} to {}", index, node))),
        };
        tracing::debug!("Chunk {} ({} bytes) -> {} as {}", index, size, node, block_id);

        conn.send_bytes(chunk).await?;

        let checksum = match conn.recv::<Response>().await? {
            Response::Stored {
                block_id: stored,
                checksum,
            } if stored == block_id => checksum,
            other => return Err(other.into_error(&format!("chunk {} to {}", index, node))),
        };
        conn.finish().await;

        let expected = blake3_hash(chunk);
        if checksum != expected {
            return Err(Error::ChecksumMismatch {
                expected,
                actual: checksum,
            });
        }

        Ok(ChunkEntry {
            index,
            node,
            size,
            block_id: Some(block_id),
            checksum: Some(checksum),
        })
    }

    /// Retrieve `name` into `dest`.
    ///
    /// Chunks are written to `<dest>.part` and renamed into place once every
    /// chunk has arrived, so a failed transfer never leaves a truncated `dest`.
    pub async fn get_file(&self, name: &str, dest: impl AsRef<Path>) -> Result<GetReport> {
        let dest = dest.as_ref();
        if fs::metadata(dest).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::InvalidInput(format!(
                "{:?} is a directory, name the file",
                dest
            )));
        }

        let (size, chunks) = match self.call_coordinator(&Request::get(name)).await? {
            Response::Located { size, chunks } => (size, chunks),
            other => return Err(other.into_error(name)),
        };

        let total: u64 = chunks.iter().map(|c| c.size).sum();
        if total != size {
            return Err(Error::Corrupted(format!(
                "manifest of {} covers {} bytes, file is {}",
                name, total, size
            )));
        }
        tracing::info!("Retrieving {} ({} bytes) from {} nodes", name, size, chunks.len());

        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);

        let written = self.fetch_into(name, &chunks, &part).await;
        if let Err(e) = written {
            let _ = fs::remove_file(&part).await;
            return Err(e);
        }
        fs::rename(&part, dest).await?;

        Ok(GetReport {
            name: clean_path(name).to_string(),
            size,
            chunks: chunks.len(),
            path: dest.to_path_buf(),
        })
    }

    /// Retrieve `name` into memory
    pub async fn get_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let (size, chunks) = match self.call_coordinator(&Request::get(name)).await? {
            Response::Located { size, chunks } => (size, chunks),
            other => return Err(other.into_error(name)),
        };

        let mut data = Vec::new();
        for entry in &chunks {
            data.extend_from_slice(&self.fetch_chunk(name, entry).await?);
        }
        if data.len() as u64 != size {
            return Err(Error::ShortRead {
                expected: size,
                received: data.len() as u64,
            });
        }
        Ok(data)
    }

    async fn fetch_into(&self, name: &str, chunks: &[ChunkEntry], path: &Path) -> Result<()> {
        let mut out = fs::File::create(path).await?;
        for entry in chunks {
            let data = self.fetch_chunk(name, entry).await?;
            out.write_all(&data).await?;
        }
        out.sync_all().await?;
        Ok(())
    }

    async fn fetch_chunk(&self, name: &str, entry: &ChunkEntry) -> Result<Vec<u8>> {
        let mut conn = self.connect(&entry.node.endpoint()).await?;

        let request = Request::get_block(name, entry.block_id.clone());
        let size = match conn.call(&request).await? {
            Response::Block { size } => size,
            other => {
                return Err(other.into_error(&format!("chunk {} from {}", entry.index, entry.node)))
            }
        };

        if size != entry.size {
            return Err(Error::Corrupted(format!(
                "chunk {} from {} is {} bytes, expected {}",
                entry.index, entry.node, size, entry.size
            )));
        }

        let data = conn.recv_bytes(size).await?;
        conn.finish().await;

        if let Some(checksum) = &entry.checksum {
            verify_checksum(&data, checksum)?;
        }
        tracing::debug!("Chunk {} ({} bytes) <- {}", entry.index, size, entry.node);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DataNodeConfig;
    use crate::datanode::DataNode;
    use tempfile::tempdir;

    async fn start_node(data_path: &Path) -> NodeId {
        let node = DataNode::bind(DataNodeConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            data_path: data_path.to_path_buf(),
            ..Default::default()
        })
        .await
        .unwrap();
        let id = node.node().clone();
        tokio::spawn(node.serve());
        id
    }

    fn client() -> DfsClient {
        // Chunk transfers never touch the coordinator
        DfsClient::new(ClientConfig::new("127.0.0.1:1"))
    }

    #[tokio::test]
    async fn test_chunk_round_trip() {
        let dir = tempdir().unwrap();
        let node = start_node(dir.path()).await;
        let client = client();

        let entry = client
            .send_chunk("report.txt", 0, node, b"hello chunk")
            .await
            .unwrap();
        assert_eq!(entry.size, 11);
        assert_eq!(entry.checksum.as_deref(), Some(blake3_hash(b"hello chunk").as_str()));

        let data = client.fetch_chunk("report.txt", &entry).await.unwrap();
        assert_eq!(data, b"hello chunk");
    }

    #[tokio::test]
    async fn test_chunk_size_disagreement_is_corruption() {
        let dir = tempdir().unwrap();
        let node = start_node(dir.path()).await;
        let client = client();

        let mut entry = client
            .send_chunk("report.txt", 0, node, b"hello chunk")
            .await
            .unwrap();
        entry.size = 12;

        assert!(matches!(
            client.fetch_chunk("report.txt", &entry).await,
            Err(Error::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_checksum_mismatch() {
        let dir = tempdir().unwrap();
        let node = start_node(dir.path()).await;
        let client = client();

        let mut entry = client
            .send_chunk("report.txt", 0, node, b"hello chunk")
            .await
            .unwrap();
        entry.checksum = Some(blake3_hash(b"something else"));

        assert!(matches!(
            client.fetch_chunk("report.txt", &entry).await,
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
