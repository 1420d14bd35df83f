//! Coordinator server
//!
//! One request per connection: decode, dispatch against the directory store,
//! reply, close. File bytes never pass through the coordinator.

use crate::common::{clean_path, timestamp_now, validate_file_name, CoordinatorConfig, Error, Result};
use crate::coordinator::directory::DirectoryStore;
use crate::protocol::{ChunkEntry, Connection, FileRecord, Manifest, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Request handlers over the shared directory store
#[derive(Clone)]
pub struct CoordState {
    directory: Arc<DirectoryStore>,
}

impl CoordState {
    pub fn new(directory: Arc<DirectoryStore>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &DirectoryStore {
        &self.directory
    }

    pub fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Reg { address, port } => self.handle_register(&address, port),
            Request::List => self.handle_list(),
            Request::Put { name, size } => self.handle_put(&name, size),
            Request::Get { name, .. } => self.handle_get(&name),
            Request::Commit { name, chunks } => self.handle_commit(&name, &chunks),
        }
    }

    /// ACK if newly registered, DUP if already known, NAK on any failure
    fn handle_register(&self, address: &str, port: u16) -> Response {
        if address.is_empty() || port == 0 {
            return Response::nak("invalid node address");
        }

        match self.directory.add_node(address, port) {
            Ok(true) => {
                tracing::info!("Registered data node {}:{}", address, port);
                Response::Ack
            }
            Ok(false) => {
                tracing::info!("Data node {}:{} already registered", address, port);
                Response::Dup
            }
            Err(e) => {
                tracing::warn!("Registration of {}:{} failed: {}", address, port, e);
                Response::nak(e.to_string())
            }
        }
    }

    fn handle_list(&self) -> Response {
        match self.directory.list_files() {
            Ok(files) => Response::list_response(files),
            Err(e) => Response::nak(e.to_string()),
        }
    }

    /// DUP if the name is taken; otherwise fix the chunk layout over the
    /// currently registered nodes, persist it, and hand the nodes back.
    fn handle_put(&self, name: &str, size: u64) -> Response {
        let name = clean_path(name);
        if let Err(e) = validate_file_name(name) {
            return Response::nak(e.to_string());
        }

        match self.directory.file(name) {
            Ok(Some(_)) => return Response::Dup,
            Ok(None) => {}
            Err(e) => return Response::nak(e.to_string()),
        }

        let nodes = match self.directory.list_nodes() {
            Ok(nodes) if nodes.is_empty() => return Response::nak(Error::NoDataNodes.to_string()),
            Ok(nodes) => nodes,
            Err(e) => return Response::nak(e.to_string()),
        };

        let manifest = match Manifest::plan(name, size, &nodes) {
            Ok(manifest) => manifest,
            Err(e) => return Response::nak(e.to_string()),
        };
        let record = FileRecord {
            name: name.to_string(),
            size,
            created_at: timestamp_now(),
        };

        match self.directory.insert_file(&record, &manifest) {
            Ok(true) => {
                tracing::info!(
                    "Inserted file ({}, {}) across {} nodes",
                    name,
                    size,
                    nodes.len()
                );
                Response::put_response(nodes)
            }
            Ok(false) => Response::Dup,
            Err(e) => Response::nak(e.to_string()),
        }
    }

    /// Chunk layout as recorded at PUT time; the live registry is not consulted
    fn handle_get(&self, name: &str) -> Response {
        let name = clean_path(name);
        match self.directory.manifest(name) {
            Ok(Some(manifest)) => Response::get_response(manifest.size, manifest.chunks),
            Ok(None) => Response::NotFound {
                name: name.to_string(),
            },
            Err(e) => Response::nak(e.to_string()),
        }
    }

    fn handle_commit(&self, name: &str, chunks: &[ChunkEntry]) -> Response {
        let name = clean_path(name);
        match self.directory.record_blocks(name, chunks) {
            Ok(_) => {
                tracing::info!("Committed {} blocks for {}", chunks.len(), name);
                Response::Ack
            }
            Err(Error::NotFound(name)) => Response::NotFound { name },
            Err(e) => {
                tracing::warn!("Commit of {} rejected: {}", name, e);
                Response::nak(e.to_string())
            }
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    listener: TcpListener,
    state: CoordState,
}

impl Coordinator {
    /// Open the directory store and bind the listen socket
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        let directory = Arc::new(DirectoryStore::open(&config.db_path)?);
        let listener = TcpListener::bind(config.bind_addr).await?;

        Ok(Self {
            config,
            listener,
            state: CoordState::new(directory),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> CoordState {
        self.state.clone()
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator");
        tracing::info!("  Listening on: {}", self.local_addr()?);
        tracing::info!("  DB path: {}", self.config.db_path.display());

        let max_frame_len = self.config.max_frame_len;
        let timeout = self.config.io_timeout();

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(state, stream, max_frame_len, timeout).await {
                    tracing::error!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    state: CoordState,
    stream: TcpStream,
    max_frame_len: usize,
    timeout: Option<Duration>,
) -> Result<()> {
    let mut conn = Connection::from_stream(stream, max_frame_len, timeout);

    let response = match conn.recv::<Request>().await {
        Ok(request) => {
            tracing::debug!("{} from {}", request.command(), conn.peer());
            state.dispatch(request)
        }
        Err(e @ (Error::Codec(_) | Error::FrameTooLarge { .. })) => {
            tracing::warn!("Malformed request from {}: {}", conn.peer(), e);
            Response::nak(format!("malformed request: {}", e))
        }
        Err(e) => return Err(e),
    };

    conn.send(&response).await?;
    conn.finish().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BlockId, NodeId};
    use tempfile::tempdir;

    fn state(dir: &std::path::Path) -> CoordState {
        CoordState::new(Arc::new(DirectoryStore::open(dir.join("dfs.db")).unwrap()))
    }

    #[test]
    fn test_register_ack_then_dup() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());

        assert_eq!(state.dispatch(Request::reg("localhost", 1111)), Response::Ack);
        assert_eq!(state.dispatch(Request::reg("localhost", 1111)), Response::Dup);
        assert!(matches!(
            state.dispatch(Request::reg("", 1111)),
            Response::Nak { .. }
        ));
        assert_eq!(state.directory().list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_put_without_nodes() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());

        assert!(matches!(
            state.dispatch(Request::put("report.txt", 500)),
            Response::Nak { .. }
        ));
        assert!(state.directory().list_files().unwrap().is_empty());
    }

    #[test]
    fn test_put_dup_and_list() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());
        state.dispatch(Request::reg("localhost", 1111));
        state.dispatch(Request::reg("localhost", 2222));

        let response = state.dispatch(Request::put("/home/user/pajaro.jpg", 9001));
        assert_eq!(response.data_nodes().unwrap().len(), 2);

        assert_eq!(state.dispatch(Request::put("pajaro.jpg", 12)), Response::Dup);

        match state.dispatch(Request::list()) {
            Response::Files { files } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].name, "pajaro.jpg");
                assert_eq!(files[0].size, 9001);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_get_uses_recorded_layout() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());
        state.dispatch(Request::reg("localhost", 1111));
        state.dispatch(Request::reg("localhost", 2222));
        state.dispatch(Request::put("pajaro.jpg", 9001));

        // A node joining later does not change where pajaro.jpg lives
        state.dispatch(Request::reg("localhost", 3333));

        let response = state.dispatch(Request::get("pajaro.jpg"));
        assert_eq!(response.file_size(), Some(9001));
        match response {
            Response::Located { chunks, .. } => {
                let sizes: Vec<u64> = chunks.iter().map(|c| c.size).collect();
                assert_eq!(sizes, vec![4500, 4501]);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        assert!(matches!(
            state.dispatch(Request::get("missing.jpg")),
            Response::NotFound { .. }
        ));
    }

    #[test]
    fn test_commit() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());
        state.dispatch(Request::reg("localhost", 1111));
        state.dispatch(Request::put("report.txt", 500));

        let node = NodeId::new("localhost", 1111);
        let chunk = ChunkEntry {
            index: 0,
            node: node.clone(),
            size: 500,
            block_id: Some(BlockId::generate(&node)),
            checksum: Some("00".repeat(32)),
        };
        assert_eq!(
            state.dispatch(Request::commit("report.txt", vec![chunk.clone()])),
            Response::Ack
        );
        assert!(matches!(
            state.dispatch(Request::commit("report.txt", vec![chunk.clone()])),
            Response::Nak { .. }
        ));
        assert!(matches!(
            state.dispatch(Request::commit("other.txt", vec![chunk])),
            Response::NotFound { .. }
        ));

        let manifest = state.directory().manifest("report.txt").unwrap().unwrap();
        assert!(manifest.is_committed());
    }
}
