//! Request/response messages exchanged between clients, the coordinator and data nodes
//!
//! Every message is a JSON object. Requests carry a `command` tag
//! (`reg`, `list`, `put`, `get`, `commit`), responses a `status` tag.
//! Raw block bytes never travel inside a message; they follow a `put`
//! handshake or a `block` header on the same connection.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a data node: the address and port it serves blocks on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub address: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// `address:port`, suitable for connecting
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A file known to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    pub created_at: u64,
}

/// Name of a stored block: `<uuid>:<owner address><owner port>`.
///
/// The owner suffix only keeps the on-disk layout readable; ownership is
/// decided from the block's metadata, never by parsing this string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn generate(owner: &NodeId) -> Self {
        Self(format!("{}:{}{}", Uuid::new_v4(), owner.address, owner.port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chunk of a file: which node holds it, how long it is, and (once the
/// upload has been committed) the block it landed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: u32,
    pub node: NodeId,
    pub size: u64,
    pub block_id: Option<BlockId>,
    pub checksum: Option<String>,
}

/// Ordered chunk layout of one file, fixed at PUT time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub size: u64,
    pub chunks: Vec<ChunkEntry>,
}

impl Manifest {
    /// Lay a file of `size` bytes out over `nodes`, in the order given
    pub fn plan(name: impl Into<String>, size: u64, nodes: &[NodeId]) -> Result<Self> {
        let sizes = crate::client::chunk::chunk_sizes(size, nodes.len())?;
        let chunks = nodes
            .iter()
            .zip(sizes)
            .enumerate()
            .map(|(index, (node, size))| ChunkEntry {
                index: index as u32,
                node: node.clone(),
                size,
                block_id: None,
                checksum: None,
            })
            .collect();

        Ok(Self {
            name: name.into(),
            size,
            chunks,
        })
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.chunks.iter().map(|c| c.node.clone()).collect()
    }

    pub fn is_committed(&self) -> bool {
        self.chunks.iter().all(|c| c.block_id.is_some())
    }
}

/// Command tag of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reg,
    List,
    Put,
    Get,
    Commit,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Reg => "reg",
            Command::List => "list",
            Command::Put => "put",
            Command::Get => "get",
            Command::Commit => "commit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Request {
    /// Data node announcing itself to the coordinator
    Reg { address: String, port: u16 },
    /// List known files
    List,
    /// To the coordinator: announce a new file. To a data node: prepare to
    /// receive `size` bytes of `name`.
    Put { name: String, size: u64 },
    /// To the coordinator: locate a file. To a data node: send back this
    /// node's block of `name` (the exact block when `block_id` is known).
    Get {
        name: String,
        block_id: Option<BlockId>,
    },
    /// Record the blocks produced by a completed upload
    Commit {
        name: String,
        chunks: Vec<ChunkEntry>,
    },
}

impl Request {
    pub fn reg(address: impl Into<String>, port: u16) -> Self {
        Request::Reg {
            address: address.into(),
            port,
        }
    }

    pub fn list() -> Self {
        Request::List
    }

    pub fn put(name: impl Into<String>, size: u64) -> Self {
        Request::Put {
            name: name.into(),
            size,
        }
    }

    pub fn get(name: impl Into<String>) -> Self {
        Request::Get {
            name: name.into(),
            block_id: None,
        }
    }

    pub fn get_block(name: impl Into<String>, block_id: Option<BlockId>) -> Self {
        Request::Get {
            name: name.into(),
            block_id,
        }
    }

    pub fn commit(name: impl Into<String>, chunks: Vec<ChunkEntry>) -> Self {
        Request::Commit {
            name: name.into(),
            chunks,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Request::Reg { .. } => Command::Reg,
            Request::List => Command::List,
            Request::Put { .. } => Command::Put,
            Request::Get { .. } => Command::Get,
            Request::Commit { .. } => Command::Commit,
        }
    }

    pub fn addr(&self) -> Option<&str> {
        match self {
            Request::Reg { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Request::Reg { port, .. } => Some(*port),
            _ => None,
        }
    }

    /// `(name, size)` of a put request
    pub fn file_info(&self) -> Option<(&str, u64)> {
        match self {
            Request::Put { name, size } => Some((name, *size)),
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Request::Put { name, .. } | Request::Get { name, .. } | Request::Commit { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Dup,
    Nak { reason: String },
    Files { files: Vec<FileRecord> },
    /// Nodes that will receive the chunks of a new file, in chunk order
    Nodes { nodes: Vec<NodeId> },
    /// Chunk layout of an existing file
    Located { size: u64, chunks: Vec<ChunkEntry> },
    /// Data node: block name assigned to an incoming chunk
    #[serde(rename = "block_id")]
    Assigned { block_id: BlockId },
    /// Data node: chunk persisted
    Stored { block_id: BlockId, checksum: String },
    /// Data node: `size` raw bytes follow
    Block { size: u64 },
    NotFound { name: String },
}

impl Response {
    pub fn nak(reason: impl Into<String>) -> Self {
        Response::Nak {
            reason: reason.into(),
        }
    }

    pub fn list_response(files: Vec<FileRecord>) -> Self {
        Response::Files { files }
    }

    pub fn put_response(nodes: Vec<NodeId>) -> Self {
        Response::Nodes { nodes }
    }

    pub fn get_response(size: u64, chunks: Vec<ChunkEntry>) -> Self {
        Response::Located { size, chunks }
    }

    /// Nodes carried by a put or get response, in chunk order
    pub fn data_nodes(&self) -> Option<Vec<NodeId>> {
        match self {
            Response::Nodes { nodes } => Some(nodes.clone()),
            Response::Located { chunks, .. } => Some(chunks.iter().map(|c| c.node.clone()).collect()),
            _ => None,
        }
    }

    /// Total file size carried by a get response
    pub fn file_size(&self) -> Option<u64> {
        match self {
            Response::Located { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ack => "ACK",
            Response::Dup => "DUP",
            Response::Nak { .. } => "NAK",
            Response::Files { .. } => "files",
            Response::Nodes { .. } => "nodes",
            Response::Located { .. } => "located",
            Response::Assigned { .. } => "block_id",
            Response::Stored { .. } => "stored",
            Response::Block { .. } => "block",
            Response::NotFound { .. } => "not_found",
        }
    }

    /// Turn a response that is not the one the caller waited for into an error
    pub fn into_error(self, context: &str) -> Error {
        match self {
            Response::Dup => Error::Duplicate(context.to_string()),
            Response::Nak { reason } => Error::Rejected(format!("{}: {}", context, reason)),
            Response::NotFound { name } => Error::NotFound(name),
            other => Error::UnexpectedResponse(format!("{}: got {}", context, other.kind())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let json = String::from_utf8(Request::reg("localhost", 1111).encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"command":"reg","address":"localhost","port":1111}"#);

        let json = String::from_utf8(Request::list().encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"command":"list"}"#);

        let json = String::from_utf8(Request::put("pajaro.jpg", 9001).encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"command":"put","name":"pajaro.jpg","size":9001}"#);
    }

    #[test]
    fn test_request_accessors() {
        let reg = Request::decode(br#"{"command":"reg","address":"10.0.0.5","port":9000}"#).unwrap();
        assert_eq!(reg.command(), Command::Reg);
        assert_eq!(reg.addr(), Some("10.0.0.5"));
        assert_eq!(reg.port(), Some(9000));
        assert_eq!(reg.file_name(), None);

        let put = Request::put("report.txt", 500);
        assert_eq!(put.command().as_str(), "put");
        assert_eq!(put.file_info(), Some(("report.txt", 500)));
        assert_eq!(put.file_name(), Some("report.txt"));

        let get = Request::decode(br#"{"command":"get","name":"report.txt"}"#).unwrap();
        assert_eq!(get, Request::get("report.txt"));
        assert_eq!(get.file_info(), None);
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        assert!(Request::decode(br#"{"command":"delete","name":"x"}"#).is_err());
        assert!(Request::decode(b"reg localhost 1111").is_err());
    }

    #[test]
    fn test_response_accessors() {
        let nodes = vec![NodeId::new("localhost", 1111), NodeId::new("localhost", 2222)];
        let put = Response::put_response(nodes.clone());
        assert_eq!(put.data_nodes(), Some(nodes.clone()));
        assert_eq!(put.file_size(), None);

        let manifest = Manifest::plan("pajaro.jpg", 9001, &nodes).unwrap();
        let get = Response::get_response(manifest.size, manifest.chunks.clone());
        let decoded = Response::decode(&get.encode().unwrap()).unwrap();
        assert_eq!(decoded.file_size(), Some(9001));
        assert_eq!(decoded.data_nodes(), Some(nodes));

        let json = String::from_utf8(Response::Dup.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"status":"dup"}"#);
    }

    #[test]
    fn test_into_error() {
        assert!(matches!(
            Response::Dup.into_error("a.txt"),
            Error::Duplicate(_)
        ));
        assert!(matches!(
            Response::nak("bad").into_error("a.txt"),
            Error::Rejected(_)
        ));
        assert!(matches!(
            Response::Ack.into_error("a.txt"),
            Error::UnexpectedResponse(_)
        ));
    }

    #[test]
    fn test_block_id_unique() {
        let node = NodeId::new("localhost", 1111);
        let a = BlockId::generate(&node);
        let b = BlockId::generate(&node);
        assert_ne!(a, b);
        assert!(a.as_str().ends_with(":localhost1111"));
    }

    #[test]
    fn test_manifest_plan() {
        let nodes = vec![
            NodeId::new("a", 1),
            NodeId::new("b", 2),
            NodeId::new("c", 3),
        ];
        let manifest = Manifest::plan("pajaro.jpg", 9001, &nodes).unwrap();
        let sizes: Vec<u64> = manifest.chunks.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![3000, 3000, 3001]);
        assert_eq!(manifest.nodes(), nodes);
        assert!(!manifest.is_committed());

        assert!(Manifest::plan("x", 10, &[]).is_err());
    }
}
